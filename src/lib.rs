//! Slidewin - Distributed Sliding-Window Rate Limiting
//!
//! This crate decides whether a request for a given subject should be
//! throttled, across any number of callers sharing one backing store.
//! Counts are kept in time-aligned buckets and the read-sum-increment step
//! runs atomically inside the store, so callers never lock or coordinate
//! with one another.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
