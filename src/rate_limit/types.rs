use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission control runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of admitted requests per client inside one window
    #[serde(default = "default_requests")]
    pub requests: u32,
    /// Width of the trailing window (in seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How often idle clients are purged (0 disables the reaper)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            requests: default_requests(),
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the reaper interval, if the reaper is enabled
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

/// Outcome of one admission decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining admissions in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_after: u64,
    /// Retry after duration (for 429 responses)
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(remaining: u32, limit: u32, reset_after: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_after,
            retry_after: None,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_after: retry_after,
            retry_after: Some(retry_after),
        }
    }
}
