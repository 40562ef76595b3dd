//! Token-bucket admission control.
//!
//! One independent bucket exists per (operation class, caller) pair. Buckets
//! refill lazily: each check adds tokens proportional to elapsed wall-clock
//! time, capped at capacity, then allows and deducts or denies with an
//! advisory retry hint. Denials are never queued or retried here; the caller
//! owns the retry.
//!
//! A secondary fixed-window counter keyed by caller and window index counts
//! every request for reporting. It never influences the allow/deny decision.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::AdmissionError;

/// Caller identity used when the dispatch layer supplies none.
pub const DEFAULT_CALLER: &str = "default";

/// Capacity and refill rate for one bucket class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    /// Maximum and initial token count.
    pub capacity: f64,
    /// Tokens restored per second of elapsed time.
    pub refill_per_sec: f64,
}

impl BucketLimits {
    /// Create a limits pair.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// Controller-wide settings: named operation classes plus a fallback.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Limits for known operation classes, keyed by operation name.
    pub operations: HashMap<String, BucketLimits>,
    /// Limits applied to operation classes seen for the first time.
    pub default_limits: BucketLimits,
    /// Width of the observational request-count window, in seconds.
    pub window_secs: i64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            operations: HashMap::new(),
            default_limits: BucketLimits::new(30.0, 10.0),
            window_secs: 60,
        }
    }
}

/// One token bucket with lazy refill.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn new(limits: BucketLimits, now: DateTime<Utc>) -> Self {
        Self {
            tokens: limits.capacity,
            capacity: limits.capacity,
            refill_per_sec: limits.refill_per_sec,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds().max(0);
        let restored = elapsed_ms as f64 / 1000.0 * self.refill_per_sec;
        self.tokens = (self.tokens + restored).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then deduct `cost` or report the advisory retry wait in ms.
    fn try_take(&mut self, cost: f64, now: DateTime<Utc>) -> Result<(), u64> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            Err((deficit / self.refill_per_sec * 1000.0).ceil() as u64)
        }
    }
}

/// Point-in-time view of one operation's bucket plus the caller's request
/// count in the current window.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    /// The operation class reported on.
    pub operation: String,
    /// Tokens currently available after lazy refill.
    pub tokens_remaining: f64,
    /// Bucket capacity.
    pub capacity: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
    /// Requests the caller made in the current window.
    pub requests_in_current_window: u64,
}

/// Per-operation token-bucket admission controller.
pub struct AdmissionController {
    settings: AdmissionSettings,
    buckets: HashMap<(String, String), TokenBucket>,
    windows: HashMap<(String, i64), u64>,
}

impl AdmissionController {
    /// Create a controller with the given settings.
    pub fn new(settings: AdmissionSettings) -> Self {
        Self {
            settings,
            buckets: HashMap::new(),
            windows: HashMap::new(),
        }
    }

    /// Admit or deny one cost-1 request for `operation`.
    pub fn check(&mut self, operation: &str, caller: Option<&str>) -> Result<(), AdmissionError> {
        self.check_at(operation, caller, 1.0, Utc::now())
    }

    /// Admit or deny a request with an explicit cost.
    pub fn check_with_cost(
        &mut self,
        operation: &str,
        caller: Option<&str>,
        cost: f64,
    ) -> Result<(), AdmissionError> {
        self.check_at(operation, caller, cost, Utc::now())
    }

    /// Report bucket state for `operation` without consuming a token.
    pub fn stats(&mut self, operation: &str, caller: Option<&str>) -> AdmissionStats {
        self.stats_at(operation, caller, Utc::now())
    }

    pub(crate) fn check_at(
        &mut self,
        operation: &str,
        caller: Option<&str>,
        cost: f64,
        now: DateTime<Utc>,
    ) -> Result<(), AdmissionError> {
        let caller = caller.unwrap_or(DEFAULT_CALLER);
        self.count_request(caller, now);

        let bucket = self.bucket_mut(operation, caller, now);
        match bucket.try_take(cost, now) {
            Ok(()) => Ok(()),
            Err(retry_after_ms) => {
                debug!(
                    operation,
                    caller, retry_after_ms, "Request denied by admission controller"
                );
                Err(AdmissionError::RateLimited {
                    operation: operation.to_string(),
                    retry_after_ms,
                })
            }
        }
    }

    pub(crate) fn stats_at(
        &mut self,
        operation: &str,
        caller: Option<&str>,
        now: DateTime<Utc>,
    ) -> AdmissionStats {
        let caller = caller.unwrap_or(DEFAULT_CALLER);
        let window_index = self.window_index(now);
        let requests = self
            .windows
            .get(&(caller.to_string(), window_index))
            .copied()
            .unwrap_or(0);

        let bucket = self.bucket_mut(operation, caller, now);
        bucket.refill(now);

        AdmissionStats {
            operation: operation.to_string(),
            tokens_remaining: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_per_sec,
            requests_in_current_window: requests,
        }
    }

    /// Lazily create the bucket for an (operation, caller) pair. Unknown
    /// operation classes fall back to the default limits.
    fn bucket_mut(
        &mut self,
        operation: &str,
        caller: &str,
        now: DateTime<Utc>,
    ) -> &mut TokenBucket {
        let limits = self
            .settings
            .operations
            .get(operation)
            .copied()
            .unwrap_or(self.settings.default_limits);
        self.buckets
            .entry((operation.to_string(), caller.to_string()))
            .or_insert_with(|| TokenBucket::new(limits, now))
    }

    fn window_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() / self.settings.window_secs.max(1)
    }

    /// Record a request in the caller's current window and drop windows
    /// older than the previous one.
    fn count_request(&mut self, caller: &str, now: DateTime<Utc>) {
        let index = self.window_index(now);
        *self
            .windows
            .entry((caller.to_string(), index))
            .or_insert(0) += 1;
        self.windows.retain(|(_, idx), _| *idx + 1 >= index);
    }
}
