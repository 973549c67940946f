use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Sliding-window command limiter.
///
/// Each user may send `max_commands` commands within any `window`. Timestamps
/// older than the window are dropped lazily on the next check.
#[derive(Clone)]
pub struct RateLimiter {
    /// Recent command timestamps per user
    hits: Arc<Mutex<HashMap<i64, VecDeque<Instant>>>>,
    max_commands: usize,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    /// Creates a limiter from `RATE_LIMIT_ENABLED` / `MAX_COMMANDS_PER_MINUTE`.
    pub fn from_config() -> Self {
        use crate::core::config::rate_limit;
        Self::new(*rate_limit::MAX_COMMANDS_PER_MINUTE, rate_limit::window(), *rate_limit::ENABLED)
    }

    pub fn new(max_commands: usize, window: Duration, enabled: bool) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            max_commands,
            window,
            enabled,
        }
    }

    /// Records a command and returns `true` if the user is within budget.
    ///
    /// A rejected command is not recorded, so a user who keeps retrying
    /// is admitted again as soon as the oldest hit leaves the window.
    pub async fn check(&self, user_id: i64) -> bool {
        if !self.enabled {
            return true;
        }

        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        let entry = hits.entry(user_id).or_default();
        while entry
            .front()
            .is_some_and(|&first| now.duration_since(first) >= self.window)
        {
            entry.pop_front();
        }

        if entry.len() >= self.max_commands {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Time until the user may send another command, if currently limited.
    pub async fn remaining_time(&self, user_id: i64) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let hits = self.hits.lock().await;
        let entry = hits.get(&user_id)?;
        if entry.len() < self.max_commands {
            return None;
        }
        let first = *entry.front()?;
        self.window.checked_sub(first.elapsed())
    }

    /// Drops users with no hits inside the window.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        hits.retain(|_, entry| entry.back().is_some_and(|&last| now.duration_since(last) < self.window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_budget() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), true);
        assert!(limiter.check(1).await);
        assert!(limiter.check(1).await);
        assert!(limiter.check(1).await);
        assert!(!limiter.check(1).await);
        assert!(limiter.remaining_time(1).await.is_some());

        // Other users are unaffected
        assert!(limiter.check(2).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), true);
        assert!(limiter.check(1).await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check(1).await);
        assert!(!limiter.check(1).await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check(1).await);
        assert!(!limiter.check(1).await);
    }

    #[tokio::test]
    async fn test_disabled_never_limits() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60), false);
        assert!(limiter.check(1).await);
        assert!(limiter.remaining_time(1).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_users() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60), true);
        limiter.check(1).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.cleanup().await;
        assert!(limiter.hits.lock().await.is_empty());
    }
}
