//! Rate limiting module
//!
//! Per-client admission control using a sliding window: each client may have
//! at most `requests` admitted requests inside any trailing `window_secs`
//! interval. The limiter is an explicit object built once at startup and
//! handed to the pipeline as middleware state.
//!
//! # Features
//!
//! - Exact sliding window (no fixed-bucket boundary bursts)
//! - Per-client locking through a sharded map
//! - Rate limit headers in responses (`X-RateLimit-*`, `Retry-After`)
//! - Optional background reaper for idle clients
//!
//! # Example
//!
//! ```rust,no_run
//! use edge_gateway::rate_limit::SlidingWindowLimiter;
//! use std::time::Duration;
//!
//! let limiter = SlidingWindowLimiter::new(100, Duration::from_secs(60));
//! let result = limiter.check("203.0.113.9");
//! assert!(result.allowed);
//! ```

pub mod middleware;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use middleware::{add_rate_limit_headers, client_identifier, rate_limit_middleware};
pub use types::{RateLimitConfig, RateLimitResult};
pub use window::SlidingWindowLimiter;
