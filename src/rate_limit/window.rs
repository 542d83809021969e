use super::types::{RateLimitConfig, RateLimitResult};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// In-memory sliding-window rate limiter keyed by client identifier.
///
/// Every client owns a record of the instants at which its requests were
/// admitted. A decision prunes the record down to the trailing window,
/// rejects when the window already holds `limit` entries, and otherwise
/// appends `now`. The prune-count-append sequence for one client runs while
/// holding that client's shard lock, so concurrent decisions for the same
/// client are serialized and never lose or double-count an entry. Clients
/// living in different shards do not contend.
pub struct SlidingWindowLimiter {
    /// Admitted request instants per client, oldest first
    clients: DashMap<String, VecDeque<Instant>>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `limit` requests per `window` for each client
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            limit,
            window,
        }
    }

    /// Create a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, config.window())
    }

    /// Decide admission for `client` at the current instant
    pub fn check(&self, client: &str) -> RateLimitResult {
        self.admit(client, Instant::now())
    }

    /// Decide admission for `client` at `now`.
    ///
    /// An entry recorded at `t` is still counted while `now - t < window`;
    /// an entry exactly one window old has expired. Never fails: rejection
    /// is an ordinary outcome.
    pub fn admit(&self, client: &str, now: Instant) -> RateLimitResult {
        let mut record = self.clients.entry(client.to_string()).or_default();

        record.retain(|&admitted| now.saturating_duration_since(admitted) < self.window);

        if record.len() >= self.limit as usize {
            let retry_after = self.seconds_until_free(&record, now);
            debug!(
                client = %client,
                in_window = record.len(),
                retry_after,
                "Rate limit exceeded"
            );
            return RateLimitResult::denied(self.limit, retry_after);
        }

        record.push_back(now);

        let remaining = self.limit - record.len() as u32;
        let reset_after = self.seconds_until_free(&record, now);
        RateLimitResult::allowed(remaining, self.limit, reset_after)
    }

    /// Seconds (rounded up) until the oldest counted entry leaves the window
    fn seconds_until_free(&self, record: &VecDeque<Instant>, now: Instant) -> u64 {
        let oldest = record.iter().min().copied().unwrap_or(now);
        let left = self
            .window
            .saturating_sub(now.saturating_duration_since(oldest));
        left.as_secs() + u64::from(left.subsec_nanos() > 0)
    }

    /// Drop every client whose record holds nothing inside the window at `now`.
    ///
    /// A fully expired record and a missing record produce the same decision,
    /// so purging never changes an admission outcome.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, record| {
            record
                .iter()
                .any(|&admitted| now.saturating_duration_since(admitted) < self.window)
        });
        before.saturating_sub(self.clients.len())
    }

    /// Spawn a background task that purges idle clients every `interval`
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Starting idle client reaper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = limiter.purge_idle(Instant::now());
                if purged > 0 {
                    debug!(purged, tracked = limiter.tracked_clients(), "Purged idle clients");
                }
            }
        })
    }

    /// Number of clients currently holding a record
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_first_request_allowed() {
        let limiter = SlidingWindowLimiter::new(100, WINDOW);
        let result = limiter.admit("10.0.0.1", Instant::now());

        assert!(result.allowed);
        assert_eq!(result.remaining, 99);
        assert_eq!(result.limit, 100);
        assert_eq!(result.reset_after, 60);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_nth_allowed_and_next_rejected() {
        let limiter = SlidingWindowLimiter::new(100, WINDOW);
        let start = Instant::now();

        // Spread the calls unevenly across the first 59 seconds
        for i in 0..100u64 {
            let now = start + Duration::from_millis(i * i * 5);
            let result = limiter.admit("10.0.0.1", now);
            assert!(result.allowed, "request {} should be allowed", i + 1);
        }

        let result = limiter.admit("10.0.0.1", start + Duration::from_millis(99 * 99 * 5));
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert!(result.retry_after.is_some());
    }

    #[test]
    fn test_entry_expires_after_window() {
        let limiter = SlidingWindowLimiter::new(2, WINDOW);
        let start = Instant::now();

        assert!(limiter.admit("client", start).allowed);
        assert!(limiter.admit("client", start + Duration::from_secs(10)).allowed);
        assert!(!limiter.admit("client", start + Duration::from_secs(59)).allowed);

        // The first entry is now exactly one window old and no longer counts
        let result = limiter.admit("client", start + WINDOW);
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);

        // The entry from t=10s still does
        assert!(!limiter.admit("client", start + Duration::from_secs(69)).allowed);
        assert!(limiter.admit("client", start + Duration::from_secs(70)).allowed);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, WINDOW);
        let start = Instant::now();

        assert!(limiter.admit("client", start).allowed);
        for s in 1..60 {
            assert!(!limiter.admit("client", start + Duration::from_secs(s)).allowed);
        }

        // Only the single admitted request was ever counted
        assert!(limiter.admit("client", start + WINDOW).allowed);
    }

    #[test]
    fn test_retry_after_counts_down_to_oldest_expiry() {
        let limiter = SlidingWindowLimiter::new(1, WINDOW);
        let start = Instant::now();

        limiter.admit("client", start);
        let denied = limiter.admit("client", start + Duration::from_millis(20_500));

        assert_eq!(denied.retry_after, Some(40));
        assert_eq!(denied.reset_after, 40);
    }

    #[test]
    fn test_clients_are_isolated() {
        let limiter = SlidingWindowLimiter::new(3, WINDOW);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.admit("client-a", now).allowed);
        }
        assert!(!limiter.admit("client-a", now).allowed);

        let result = limiter.admit("client-b", now);
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_purge_idle_keeps_active_clients() {
        let limiter = SlidingWindowLimiter::new(10, WINDOW);
        let start = Instant::now();

        limiter.admit("idle", start);
        limiter.admit("active", start + Duration::from_secs(30));

        assert_eq!(limiter.purge_idle(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        let result = limiter.admit("active", start + Duration::from_secs(61));
        assert_eq!(result.remaining, 8);
    }

    #[test]
    fn test_from_config() {
        let config = RateLimitConfig {
            requests: 5,
            window_secs: 10,
            ..Default::default()
        };
        let limiter = SlidingWindowLimiter::from_config(&config);

        assert_eq!(limiter.limit(), 5);
        assert_eq!(limiter.window(), Duration::from_secs(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_admissions_single_client() {
        let limiter = Arc::new(SlidingWindowLimiter::new(100, WINDOW));
        let now = Instant::now();

        let handles: Vec<_> = (0..150)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.admit("10.0.0.7", now).allowed })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 100);
        assert!(!limiter.admit("10.0.0.7", now).allowed);
    }

    #[test]
    fn test_concurrent_admissions_os_threads() {
        let limiter = Arc::new(SlidingWindowLimiter::new(100, WINDOW));
        let now = Instant::now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..15)
                        .filter(|_| limiter.admit("shared", now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }

    #[tokio::test]
    async fn test_reaper_purges_in_background() {
        let limiter = Arc::new(SlidingWindowLimiter::new(10, Duration::from_millis(20)));
        limiter.check("short-lived");
        assert_eq!(limiter.tracked_clients(), 1);

        let handle = limiter.spawn_reaper(Duration::from_millis(50));

        // Window expires after 20ms; the reaper has ticked several times by now
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(limiter.tracked_clients(), 0);
        handle.abort();
    }
}
