//! Rate limiting for login attempts.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Rolling window for counting failed logins.
pub const LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Failures allowed per client inside the window.
pub const LOGIN_ATTEMPT_LIMIT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, client: &str) -> RateLimitDecision;
    fn record_failure(&self, client: &str);
}

/// Disables lockout entirely (`ENABLE_ACCOUNT_LOCKOUT=false`).
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _client: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn record_failure(&self, _client: &str) {}
}

/// Sliding-window count of failed logins per client.
///
/// Only failures count: once the limit is reached, a correct password inside
/// the window is still rejected. The window slides, so clients recover
/// without any reset bookkeeping.
#[derive(Debug)]
pub struct FailedLoginLimiter {
    window: Duration,
    limit: usize,
    failures: Mutex<HashMap<String, Vec<Instant>>>,
}

impl FailedLoginLimiter {
    #[must_use]
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        // A panic while holding the lock leaves only prunable timestamps
        // behind, so a poisoned map is still usable.
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RateLimiter for FailedLoginLimiter {
    fn check(&self, client: &str) -> RateLimitDecision {
        let mut failures = self.lock();
        let Some(entries) = failures.get_mut(client) else {
            return RateLimitDecision::Allowed;
        };
        entries.retain(|at| at.elapsed() < self.window);
        if entries.len() >= self.limit {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }

    fn record_failure(&self, client: &str) {
        let mut failures = self.lock();
        // Keep the map bounded: drop clients whose failures all aged out.
        if failures.len() > 1024 {
            let window = self.window;
            failures.retain(|_, entries| {
                entries.retain(|at| at.elapsed() < window);
                !entries.is_empty()
            });
        }
        let entries = failures.entry(client.to_string()).or_default();
        entries.retain(|at| at.elapsed() < self.window);
        entries.push(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FailedLoginLimiter, NoopRateLimiter, RateLimitDecision, RateLimiter, LOGIN_ATTEMPT_LIMIT,
    };
    use std::time::Duration;

    #[test]
    fn noop_always_allows() {
        let limiter = NoopRateLimiter;
        limiter.record_failure("10.0.0.1");
        assert_eq!(limiter.check("10.0.0.1"), RateLimitDecision::Allowed);
    }

    #[test]
    fn limits_after_five_failures_in_window() {
        let limiter = FailedLoginLimiter::new(Duration::from_secs(60), LOGIN_ATTEMPT_LIMIT);

        for _ in 0..LOGIN_ATTEMPT_LIMIT {
            assert_eq!(limiter.check("10.0.0.1"), RateLimitDecision::Allowed);
            limiter.record_failure("10.0.0.1");
        }

        // Sixth attempt is rejected before credentials are even looked at.
        assert_eq!(limiter.check("10.0.0.1"), RateLimitDecision::Limited);
        // Other clients are unaffected.
        assert_eq!(limiter.check("10.0.0.2"), RateLimitDecision::Allowed);
    }

    #[test]
    fn failures_age_out_of_the_window() {
        let limiter = FailedLoginLimiter::new(Duration::from_millis(20), 1);
        limiter.record_failure("10.0.0.1");
        assert_eq!(limiter.check("10.0.0.1"), RateLimitDecision::Limited);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check("10.0.0.1"), RateLimitDecision::Allowed);
    }
}
