//! Bucketed counter stores.
//!
//! A store owns the read-sum-conditional-increment step of the sliding
//! window. Every implementation must run that step atomically per field:
//! two callers that both see `limit - 1` must not both be admitted.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use ::redis::Value;
use serde::Serialize;

use crate::error::{Result, SlidewinError};
use crate::ratelimit::WindowPlan;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Outcome of one increment-and-check against a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowCount {
    /// Requests counted in the window before this one
    pub current_count: u64,
    /// Whether this request was rejected (and therefore not counted)
    pub throttled: bool,
    /// Seconds until the newest active bucket leaves the window
    pub earliest_expiry_secs: i64,
}

impl WindowCount {
    /// Combine a raw store reply with the plan it was computed for.
    pub fn from_reply(plan: &WindowPlan, reply: ScriptReply) -> Self {
        Self {
            current_count: reply.counter,
            throttled: reply.throttled,
            earliest_expiry_secs: plan.earliest_expiry_secs(reply.newest_active_bucket),
        }
    }
}

/// Trait for bucketed counter store implementations.
///
/// This trait abstracts over the Redis-backed store and the embedded
/// in-process store so the rate limiter can work with either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count the sliding window for `field` and admit the request if the
    /// count is below `limit_per_window`.
    ///
    /// A rejected request leaves the store untouched.
    async fn increment_and_check(
        &self,
        field: &str,
        limit_per_window: u64,
        window_interval: Duration,
        bucket_interval: Duration,
    ) -> Result<WindowCount>;
}

/// The 3-tuple produced by the atomic window operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptReply {
    /// Sum of the field's counts across the window's buckets
    pub counter: u64,
    /// Whether the limit had already been reached
    pub throttled: bool,
    /// Newest bucket id holding a non-zero count, 0 if none did
    pub newest_active_bucket: u64,
}

impl ScriptReply {
    /// Decode a reply from the store.
    ///
    /// Numbers may arrive as integers, integral doubles, or numeric strings
    /// depending on protocol version; anything else is a decode error.
    pub fn decode(value: &Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(SlidewinError::Decode(format!(
                    "expected a 3 element array, got {:?}",
                    other
                )))
            }
        };

        let [counter, throttled, newest] = items.as_slice() else {
            return Err(SlidewinError::Decode(format!(
                "expected 3 elements, got {}",
                items.len()
            )));
        };

        let counter = decode_int(counter, "counter")?;
        let throttled = decode_int(throttled, "throttle flag")?;
        let newest = decode_int(newest, "newest bucket")?;

        let counter = u64::try_from(counter)
            .map_err(|_| SlidewinError::Decode(format!("negative counter {}", counter)))?;
        let throttled = match throttled {
            0 => false,
            1 => true,
            other => {
                return Err(SlidewinError::Decode(format!(
                    "throttle flag must be 0 or 1, got {}",
                    other
                )))
            }
        };
        let newest_active_bucket = u64::try_from(newest)
            .map_err(|_| SlidewinError::Decode(format!("negative bucket id {}", newest)))?;

        Ok(Self {
            counter,
            throttled,
            newest_active_bucket,
        })
    }
}

fn decode_int(value: &Value, what: &str) -> Result<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Double(f) => integral(*f, what),
        Value::BulkString(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| SlidewinError::Decode(format!("{} is not valid UTF-8", what)))?;
            parse_numeric(text, what)
        }
        Value::SimpleString(text) => parse_numeric(text, what),
        other => Err(SlidewinError::Decode(format!(
            "{}: expected a number, got {:?}",
            what, other
        ))),
    }
}

fn parse_numeric(text: &str, what: &str) -> Result<i64> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(n);
    }
    match text.parse::<f64>() {
        Ok(f) => integral(f, what),
        Err(_) => Err(SlidewinError::Decode(format!(
            "{}: {:?} is not a number",
            what, text
        ))),
    }
}

fn integral(f: f64, what: &str) -> Result<i64> {
    if f.is_finite() && f.fract() == 0.0 {
        Ok(f as i64)
    } else {
        Err(SlidewinError::Decode(format!(
            "{}: {} is not an integer",
            what, f
        )))
    }
}
