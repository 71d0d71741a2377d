//! Rate limit response metadata.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::store::WindowCount;

/// Header carrying the configured limit.
pub const RATELIMIT_LIMIT: &str = "RateLimit-Limit";
/// Header carrying the remaining quota.
pub const RATELIMIT_REMAINING: &str = "RateLimit-Remaining";
/// Header carrying the seconds until quota frees up.
pub const RATELIMIT_RESET: &str = "RateLimit-Reset";

/// Metadata describing a decision to the caller's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitMetadata {
    /// Configured requests per window
    pub limit: u64,
    /// Requests left before throttling starts
    pub remaining: u64,
    /// Seconds until the newest active bucket leaves the window; omitted when zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<i64>,
}

impl RateLimitMetadata {
    /// Build metadata for a store result under `limit`.
    pub fn new(limit: u64, count: &WindowCount) -> Self {
        let reset = match count.earliest_expiry_secs {
            0 => None,
            secs => Some(secs),
        };

        Self {
            limit,
            remaining: limit.saturating_sub(count.current_count),
            reset,
        }
    }

    /// Header name/value pairs, in `RateLimit-*` order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (RATELIMIT_LIMIT, self.limit.to_string()),
            (RATELIMIT_REMAINING, self.remaining.to_string()),
        ];
        if let Some(reset) = self.reset {
            pairs.push((RATELIMIT_RESET, reset.to_string()));
        }
        pairs
    }

    /// Write the metadata into an HTTP header map, replacing earlier values.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static("ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
        match self.reset {
            Some(reset) => {
                headers.insert(
                    HeaderName::from_static("ratelimit-reset"),
                    HeaderValue::from(reset),
                );
            }
            None => {
                headers.remove("ratelimit-reset");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(current_count: u64, earliest_expiry_secs: i64) -> WindowCount {
        WindowCount {
            current_count,
            throttled: false,
            earliest_expiry_secs,
        }
    }

    #[test]
    fn test_remaining() {
        assert_eq!(RateLimitMetadata::new(5, &count(0, 10)).remaining, 5);
        assert_eq!(RateLimitMetadata::new(5, &count(3, 10)).remaining, 2);
        assert_eq!(RateLimitMetadata::new(5, &count(5, 10)).remaining, 0);
        assert_eq!(RateLimitMetadata::new(5, &count(9, 10)).remaining, 0);
    }

    #[test]
    fn test_reset_omitted_when_zero() {
        let metadata = RateLimitMetadata::new(5, &count(1, 0));
        assert_eq!(metadata.reset, None);

        let mut headers = HeaderMap::new();
        metadata.write_to(&mut headers);
        assert!(headers.get(RATELIMIT_RESET).is_none());
        assert_eq!(headers.get(RATELIMIT_LIMIT).unwrap(), "5");
        assert_eq!(headers.get(RATELIMIT_REMAINING).unwrap(), "4");

        assert!(metadata.pairs().iter().all(|(name, _)| *name != RATELIMIT_RESET));
    }

    #[test]
    fn test_write_headers() {
        let metadata = RateLimitMetadata::new(2, &count(0, 57));

        let mut headers = HeaderMap::new();
        metadata.write_to(&mut headers);

        assert_eq!(headers.get("ratelimit-limit").unwrap(), "2");
        assert_eq!(headers.get("ratelimit-remaining").unwrap(), "2");
        assert_eq!(headers.get("ratelimit-reset").unwrap(), "57");
    }

    #[test]
    fn test_rewrite_clears_stale_reset() {
        let mut headers = HeaderMap::new();
        RateLimitMetadata::new(2, &count(0, 57)).write_to(&mut headers);
        RateLimitMetadata::new(2, &count(1, 0)).write_to(&mut headers);

        assert!(headers.get(RATELIMIT_RESET).is_none());
        assert_eq!(headers.get(RATELIMIT_REMAINING).unwrap(), "1");
    }

    #[test]
    fn test_pairs_order() {
        let pairs = RateLimitMetadata::new(10, &count(4, 30)).pairs();
        assert_eq!(
            pairs,
            vec![
                (RATELIMIT_LIMIT, "10".to_string()),
                (RATELIMIT_REMAINING, "6".to_string()),
                (RATELIMIT_RESET, "30".to_string()),
            ]
        );
    }

    #[test]
    fn test_serialize_skips_missing_reset() {
        let json = serde_json::to_string(&RateLimitMetadata::new(3, &count(1, 0))).unwrap();
        assert_eq!(json, r#"{"limit":3,"remaining":2}"#);
    }
}
