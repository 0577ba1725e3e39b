//! Per-connection inbound rate limiting.
//!
//! Counters sit behind this type so a multi-instance deployment can
//! swap in an externally backed implementation without touching the
//! gateway.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(60);

/// Counter interface; a multi-instance deployment swaps in an
/// externally backed implementation without touching the gateway.
pub trait RateCounter: Send + Sync {
    /// Record one inbound frame; `false` means over budget.
    fn allow(&self, connection: Uuid) -> bool;
    fn forget(&self, connection: Uuid);
}

/// Fixed one-minute windows per connection.
pub struct FixedWindowRateLimiter {
    max_per_minute: u32,
    windows: Mutex<HashMap<Uuid, (Instant, u32)>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        FixedWindowRateLimiter {
            max_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one inbound frame; `false` means the connection is over
    /// its budget for this window.
    pub fn allow(&self, connection: Uuid) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let entry = windows.entry(connection).or_insert((now, 0));
        if now.duration_since(entry.0) >= WINDOW {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_per_minute
    }

    pub fn forget(&self, connection: Uuid) {
        self.windows
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(&connection);
    }
}

impl RateCounter for FixedWindowRateLimiter {
    fn allow(&self, connection: Uuid) -> bool {
        FixedWindowRateLimiter::allow(self, connection)
    }

    fn forget(&self, connection: Uuid) {
        FixedWindowRateLimiter::forget(self, connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_the_window_budget() {
        let limiter = FixedWindowRateLimiter::new(3);
        let conn = Uuid::new_v4();
        assert!(limiter.allow(conn));
        assert!(limiter.allow(conn));
        assert!(limiter.allow(conn));
        assert!(!limiter.allow(conn));
    }

    #[test]
    fn connections_are_independent() {
        let limiter = FixedWindowRateLimiter::new(1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }
}
