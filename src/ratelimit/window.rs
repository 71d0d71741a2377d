//! Bucket grid arithmetic for the sliding window.
//!
//! Time is aligned on a grid of `bucket_interval` steps counted from the
//! Unix epoch, so every caller that lands in the same bucket period derives
//! the same bucket identifiers without talking to anyone else.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Result, SlidewinError};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Look-back duration used when none is configured.
pub const DEFAULT_WINDOW_INTERVAL: Duration = Duration::from_secs(60);
/// Bucket granularity used when none is configured.
pub const DEFAULT_BUCKET_INTERVAL: Duration = Duration::from_secs(5);

/// The set of buckets covering one sliding window, as seen from one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    /// Nanoseconds since the epoch at which the plan was made.
    now_nanos: u128,
    /// Right edge of the window, aligned to the bucket grid.
    expire_nanos: u128,
    /// Bucket identifiers (Unix seconds), newest first.
    buckets: Vec<u64>,
    /// Whole seconds until the right edge, truncated toward zero.
    ttl_secs: i64,
}

impl WindowPlan {
    /// Plan the window for the current wall-clock time.
    pub fn now(window_interval: Duration, bucket_interval: Duration) -> Result<Self> {
        Self::new(SystemTime::now(), window_interval, bucket_interval)
    }

    /// Plan the window as seen from `now`.
    ///
    /// Walks backward from the grid-aligned right edge in `bucket_interval`
    /// steps while the boundary is still strictly after `now`.
    pub fn new(now: SystemTime, window_interval: Duration, bucket_interval: Duration) -> Result<Self> {
        validate_intervals(window_interval, bucket_interval)?;

        let now_nanos = now.duration_since(UNIX_EPOCH)?.as_nanos();
        let bucket_nanos = bucket_interval.as_nanos();
        let expire_nanos = (now_nanos + window_interval.as_nanos()) / bucket_nanos * bucket_nanos;

        let mut buckets = Vec::new();
        let mut boundary = expire_nanos;
        while boundary > now_nanos {
            buckets.push((boundary / NANOS_PER_SEC) as u64);
            // boundary is a positive multiple of bucket_nanos here
            boundary -= bucket_nanos;
        }

        let ttl_secs = seconds_between(now_nanos, expire_nanos);

        Ok(Self {
            now_nanos,
            expire_nanos,
            buckets,
            ttl_secs,
        })
    }

    /// Bucket identifiers covered by the window, newest first.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Identifier of the bucket that receives increments.
    pub fn newest_bucket(&self) -> u64 {
        (self.expire_nanos / NANOS_PER_SEC) as u64
    }

    /// Seconds the newest bucket should live.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Seconds until `newest_active` (a bucket id reported by the store)
    /// falls out of the window.
    ///
    /// Falls back to the ttl when no bucket had activity (`0`) or when the
    /// bucket boundary is already behind us.
    pub fn earliest_expiry_secs(&self, newest_active: u64) -> i64 {
        if newest_active == 0 {
            return self.ttl_secs;
        }

        let secs = seconds_between(self.now_nanos, newest_active as u128 * NANOS_PER_SEC);
        if secs < 0 {
            self.ttl_secs
        } else {
            secs
        }
    }
}

/// Check that a window/bucket pair can form a bucket grid.
///
/// Bucket identifiers are Unix seconds, so the bucket interval has to be a
/// whole, non-zero number of seconds.
pub fn validate_intervals(window_interval: Duration, bucket_interval: Duration) -> Result<()> {
    if window_interval.is_zero() {
        return Err(SlidewinError::InvalidInterval(
            "window interval must be greater than zero".to_string(),
        ));
    }
    if bucket_interval.is_zero() {
        return Err(SlidewinError::InvalidInterval(
            "bucket interval must be greater than zero".to_string(),
        ));
    }
    if bucket_interval.subsec_nanos() != 0 {
        return Err(SlidewinError::InvalidInterval(format!(
            "bucket interval must be a whole number of seconds, got {:?}",
            bucket_interval
        )));
    }
    Ok(())
}

/// Signed whole seconds from `from` to `to`, truncated toward zero.
fn seconds_between(from: u128, to: u128) -> i64 {
    let diff = to as i128 - from as i128;
    (diff / NANOS_PER_SEC as i128) as i64
}
