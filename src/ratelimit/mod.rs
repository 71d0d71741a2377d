//! Rate limiting policy: fields, window planning, decisions and metadata.

mod field;
mod headers;
mod limiter;
mod window;

pub use field::Field;
pub use headers::{RateLimitMetadata, RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};
pub use limiter::{Decision, RateLimiter, RateLimiterOptions};
pub use window::{
    validate_intervals, WindowPlan, DEFAULT_BUCKET_INTERVAL, DEFAULT_WINDOW_INTERVAL,
};
