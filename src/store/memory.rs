//! In-process counter store.
//!
//! Mirrors the Redis layout: one record per bucket id holding a count per
//! field, with a record-level expiry. Calls for the same field are
//! serialized through a per-field lock; different fields proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{CounterStore, ScriptReply, WindowCount};
use crate::error::Result;
use crate::ratelimit::WindowPlan;

/// One bucket: field counts sharing a single expiry deadline.
#[derive(Debug, Default)]
struct BucketRecord {
    counts: HashMap<String, u64>,
    expires_at: Option<Instant>,
}

impl BucketRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// A counter store that lives inside the current process.
///
/// State is not shared across processes. Useful for single-node
/// deployments and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Bucket records by bucket id.
    buckets: DashMap<u64, BucketRecord>,
    /// Per-field locks guarding the read-sum-increment step.
    field_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bucket records.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.buckets.len()
    }

    /// Whether no live bucket records remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count stored for `field` in `bucket`, if the record is still live.
    pub fn count(&self, bucket: u64, field: &str) -> Option<u64> {
        let now = Instant::now();
        self.buckets
            .get(&bucket)
            .filter(|record| !record.is_expired(now))
            .and_then(|record| record.counts.get(field).copied())
    }

    /// Drop expired bucket records and idle field locks.
    ///
    /// Returns the number of bucket records removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, record| !record.is_expired(now));
        // A lock only the map refers to has no caller waiting on it
        self.field_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.buckets.len())
    }

    /// Remove all state.
    pub fn clear(&self) {
        self.buckets.clear();
        self.field_locks.clear();
    }

    fn field_lock(&self, field: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.field_locks.get(field) {
            return lock.clone();
        }
        self.field_locks
            .entry(field.to_string())
            .or_default()
            .clone()
    }

    /// Forget `field`'s lock once the map holds the only reference.
    fn release_field_lock(&self, field: &str) {
        self.field_locks
            .remove_if(field, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// The atomic window step. Must run while holding the field's lock.
    fn apply(&self, plan: &WindowPlan, field: &str, limit_per_window: u64) -> ScriptReply {
        let now = Instant::now();
        let mut counter = 0u64;
        let mut newest_active = 0u64;

        // Bucket ids only move forward, so expired records are never
        // revisited by a later plan
        self.buckets.retain(|_, record| !record.is_expired(now));

        for bucket in plan.buckets() {
            let count = self
                .buckets
                .get(bucket)
                .and_then(|record| record.counts.get(field).copied())
                .unwrap_or(0);
            if count > 0 {
                counter += count;
                newest_active = newest_active.max(*bucket);
            }
        }

        if counter >= limit_per_window {
            return ScriptReply {
                counter,
                throttled: true,
                newest_active_bucket: newest_active,
            };
        }

        let newest = plan.newest_bucket();
        let ttl = plan.ttl_secs();
        if ttl > 0 {
            let mut record = self.buckets.entry(newest).or_default();
            if record.is_expired(now) {
                record.counts.clear();
            }
            *record.counts.entry(field.to_string()).or_insert(0) += 1;
            record.expires_at = Some(now + Duration::from_secs(ttl as u64));
        } else {
            // An expiry that is already due deletes the record outright
            self.buckets.remove(&newest);
        }

        ScriptReply {
            counter,
            throttled: false,
            newest_active_bucket: newest_active,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_check(
        &self,
        field: &str,
        limit_per_window: u64,
        window_interval: Duration,
        bucket_interval: Duration,
    ) -> Result<WindowCount> {
        let plan = WindowPlan::now(window_interval, bucket_interval)?;

        trace!(
            field = %field,
            buckets = plan.buckets().len(),
            newest_bucket = plan.newest_bucket(),
            ttl = plan.ttl_secs(),
            "Evaluating sliding window"
        );

        let lock = self.field_lock(field);
        let reply = {
            let _guard = lock.lock();
            self.apply(&plan, field, limit_per_window)
        };
        drop(lock);
        self.release_field_lock(field);

        let count = WindowCount::from_reply(&plan, reply);
        if count.throttled {
            debug!(
                field = %field,
                count = count.current_count,
                limit = limit_per_window,
                "Sliding window limit reached"
            );
        }
        Ok(count)
    }
}
