//! Persistent fixed-window rate limiting
//!
//! Counters are keyed by `(key, action)` and survive restarts. A window opens on the first attempt
//! and every attempt inside it counts, allowed or not, until `reset_at` passes.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

use entity::RateLimit;

use crate::clock::Clock;

/// The counter state of a single window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub attempts: i64,
    pub reset_at: DateTime<Utc>,
}

impl Window {
    pub fn fresh(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            attempts: 0,
            reset_at: now + length,
        }
    }

    /// Apply one attempt at `now`, returning the resulting window and whether it was allowed.
    ///
    /// An elapsed window restarts before the attempt is counted; a full one rejects it unchanged.
    pub fn admit(self, now: DateTime<Utc>, limit: i64, length: Duration) -> (Window, bool) {
        let mut window = if now > self.reset_at {
            Window::fresh(now, length)
        } else {
            self
        };
        if window.attempts >= limit {
            return (window, false);
        }
        window.attempts += 1;
        (window, true)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Count an attempt of `action` by `key`, returning whether it is allowed.
    ///
    /// The read and the write happen in one write transaction, so concurrent callers cannot both
    /// take the last slot of a window.
    pub async fn check_and_increment(
        &self,
        key: &str,
        action: &str,
        limit: i64,
        length: Duration,
    ) -> Result<bool, sqlx::Error> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        // writing first takes the database write lock before anything is read
        sqlx::query(
            "INSERT INTO rate_limits (key, action, attempts, reset_at, created_at) \
             VALUES (?, ?, 0, ?, ?) ON CONFLICT(key, action) DO NOTHING",
        )
        .bind(key)
        .bind(action)
        .bind(now + length)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: RateLimit = sqlx::query_as(
            "SELECT key, action, attempts, reset_at, created_at FROM rate_limits \
             WHERE key = ? AND action = ?",
        )
        .bind(key)
        .bind(action)
        .fetch_one(&mut *tx)
        .await?;

        if row.is_reset_time(now) {
            debug!(key, action, "Rate limit window elapsed, starting a new one");
        }
        let current = Window {
            attempts: row.attempts,
            reset_at: row.reset_at,
        };
        let (next, allowed) = current.admit(now, limit, length);
        if next != current {
            sqlx::query("UPDATE rate_limits SET attempts = ?, reset_at = ? WHERE key = ? AND action = ?")
                .bind(next.attempts)
                .bind(next.reset_at)
                .bind(key)
                .bind(action)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if allowed {
            debug!(key, action, attempts = next.attempts, "Rate limit attempt counted");
        } else {
            warn!(key, action, "Rate limit exceeded");
        }
        Ok(allowed)
    }

    /// Attempts counted in the current window, if a counter exists.
    pub async fn attempts(&self, key: &str, action: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT attempts FROM rate_limits WHERE key = ? AND action = ?")
            .bind(key)
            .bind(action)
            .fetch_optional(&self.pool)
            .await
    }

    /// Delete counters whose window ended more than `retention` ago.
    pub async fn prune(&self, retention: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = self.clock.now() - retention;
        let removed = sqlx::query("DELETE FROM rate_limits WHERE julianday(reset_at) < julianday(?)")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            debug!(removed, "Pruned stale rate limit counters");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit() {
        let now = Utc::now();
        let length = Duration::minutes(15);
        let mut window = Window::fresh(now, length);

        for expected in 1..=3 {
            let (next, allowed) = window.admit(now, 3, length);
            assert!(allowed);
            assert_eq!(next.attempts, expected);
            window = next;
        }
        let (next, allowed) = window.admit(now, 3, length);
        assert!(!allowed);
        assert_eq!(next, window);
    }

    #[test]
    fn elapsed_window_restarts() {
        let now = Utc::now();
        let length = Duration::minutes(15);
        let full = Window {
            attempts: 5,
            reset_at: now,
        };

        // still inside the window at exactly reset_at
        assert!(!full.admit(now, 5, length).1);

        let later = now + Duration::seconds(1);
        let (next, allowed) = full.admit(later, 5, length);
        assert!(allowed);
        assert_eq!(next.attempts, 1);
        assert_eq!(next.reset_at, later + length);
    }
}
