//! Per-(user, tool) and per-user rate-limit buckets.
//!
//! A sliding 60-second window of invocation timestamps per bucket, counting
//! rather than token-bucket smoothing: a request is admitted if the number
//! of invocations recorded for its bucket in the trailing 60 seconds is
//! below the configured limit. Two buckets are checked per invocation: one
//! keyed on `(user_id, tool_name)` against that tool's own limit, and one
//! keyed on `user_id` alone against the tool-independent global limit — a
//! user spreading calls across many tools still hits the global cap. A
//! `limit_per_minute` of 0 means unlimited and always admits.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Bucket {
    timestamps: Vec<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        self.timestamps.retain(|t| now.duration_since(*t) < WINDOW);
    }
}

pub struct RateLimiter {
    per_tool: HashMap<(String, String), Bucket>,
    per_user: HashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            per_tool: HashMap::new(),
            per_user: HashMap::new(),
        }
    }

    /// Record an attempt for `(user_id, tool_name)`; admit only if both the
    /// per-tool bucket (against `limit_per_minute`) and the tool-independent
    /// global per-user bucket (against `global_limit_per_minute`) have room.
    /// Checks are performed before either bucket commits, so a call that
    /// would pass one bucket but fail the other is rejected without
    /// consuming room in the bucket it passed.
    pub fn try_acquire(
        &mut self,
        user_id: &str,
        tool_name: &str,
        limit_per_minute: u32,
        global_limit_per_minute: u32,
    ) -> bool {
        let now = Instant::now();

        let tool_bucket = self
            .per_tool
            .entry((user_id.to_string(), tool_name.to_string()))
            .or_default();
        tool_bucket.prune(now);
        let tool_has_room =
            limit_per_minute == 0 || (tool_bucket.timestamps.len() as u32) < limit_per_minute;

        let user_bucket = self.per_user.entry(user_id.to_string()).or_default();
        user_bucket.prune(now);
        let user_has_room = global_limit_per_minute == 0
            || (user_bucket.timestamps.len() as u32) < global_limit_per_minute;

        if !tool_has_room || !user_has_room {
            return false;
        }

        if limit_per_minute != 0 {
            self.per_tool
                .get_mut(&(user_id.to_string(), tool_name.to_string()))
                .expect("bucket inserted above")
                .timestamps
                .push(now);
        }
        if global_limit_per_minute != 0 {
            self.per_user
                .get_mut(user_id)
                .expect("bucket inserted above")
                .timestamps
                .push(now);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_blocks() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.try_acquire("u1", "T", 2, 100));
        assert!(limiter.try_acquire("u1", "T", 2, 100));
        assert!(!limiter.try_acquire("u1", "T", 2, 100));
    }

    #[test]
    fn buckets_are_isolated_per_user_and_tool() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.try_acquire("u1", "T", 1, 100));
        assert!(!limiter.try_acquire("u1", "T", 1, 100));
        assert!(limiter.try_acquire("u2", "T", 1, 100));
        assert!(limiter.try_acquire("u1", "OtherTool", 1, 100));
    }

    #[test]
    fn global_bucket_caps_calls_spread_across_distinct_tools() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.try_acquire("u1", "ToolA", 100, 2));
        assert!(limiter.try_acquire("u1", "ToolB", 100, 2));
        assert!(!limiter.try_acquire("u1", "ToolC", 100, 2));
    }

    #[test]
    fn global_bucket_is_isolated_per_user() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.try_acquire("u1", "ToolA", 100, 1));
        assert!(!limiter.try_acquire("u1", "ToolB", 100, 1));
        assert!(limiter.try_acquire("u2", "ToolA", 100, 1));
    }

    #[test]
    fn rejection_on_one_bucket_does_not_consume_the_other() {
        let mut limiter = RateLimiter::new();
        // Global bucket has room for only one more call; tool bucket is
        // already exhausted. The rejected call must not consume the global
        // bucket's remaining slot.
        assert!(limiter.try_acquire("u1", "T", 1, 5));
        assert!(!limiter.try_acquire("u1", "T", 1, 5));
        assert!(limiter.try_acquire("u1", "OtherTool", 1, 5));
    }

    #[test]
    fn zero_tool_limit_means_unlimited() {
        let mut limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.try_acquire("u1", "T", 0, 100_000));
        }
    }

    #[test]
    fn zero_global_limit_means_unlimited() {
        let mut limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.try_acquire("u1", "T", 100_000, 0));
        }
    }
}
