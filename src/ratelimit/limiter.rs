//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use serde::Serialize;
use tracing::{debug, instrument};

use super::field::Field;
use super::headers::RateLimitMetadata;
use super::window::{validate_intervals, DEFAULT_BUCKET_INTERVAL, DEFAULT_WINDOW_INTERVAL};
use crate::error::{Result, SlidewinError};
use crate::store::{CounterStore, WindowCount};

/// Options for building a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterOptions {
    /// Namespace separating limiters that share one store
    pub name: String,
    /// Maximum admitted requests per window
    pub limit_per_minute: u64,
    /// Look-back duration; defaults to one minute when unset or zero
    pub window_interval: Option<Duration>,
    /// Bucket granularity; defaults to five seconds when unset or zero
    pub bucket_interval: Option<Duration>,
    /// Whether decisions carry response metadata
    pub write_headers: bool,
    /// Count requests but never report them as throttled
    pub dev_mode: bool,
}

impl RateLimiterOptions {
    /// Options for a limiter called `name` admitting `limit_per_minute`
    /// requests per window, with every other setting at its default.
    pub fn new(name: impl Into<String>, limit_per_minute: u64) -> Self {
        Self {
            name: name.into(),
            limit_per_minute,
            window_interval: None,
            bucket_interval: None,
            write_headers: false,
            dev_mode: false,
        }
    }
}

/// The result of one rate limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the caller should reject the request
    pub throttled: bool,
    /// The store's view of the window
    pub count: WindowCount,
    /// Response metadata, when header writing is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RateLimitMetadata>,
}

/// A sliding-window rate limiter over a shared counter store.
///
/// Holds no per-key state of its own, so any number of instances (in this
/// process or others) can share one store.
pub struct RateLimiter {
    name: String,
    store: Arc<dyn CounterStore>,
    limit_per_minute: u64,
    window_interval: Duration,
    bucket_interval: Duration,
    write_headers: bool,
    dev_mode: bool,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("limit_per_minute", &self.limit_per_minute)
            .field("window_interval", &self.window_interval)
            .field("bucket_interval", &self.bucket_interval)
            .field("write_headers", &self.write_headers)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl RateLimiter {
    /// Create a new rate limiter over `store`.
    pub fn new(store: Arc<dyn CounterStore>, options: RateLimiterOptions) -> Result<Self> {
        let window_interval = options
            .window_interval
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_WINDOW_INTERVAL);
        let bucket_interval = options
            .bucket_interval
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_BUCKET_INTERVAL);

        validate_intervals(window_interval, bucket_interval)?;
        if bucket_interval > window_interval {
            return Err(SlidewinError::InvalidInterval(format!(
                "bucket interval {:?} is longer than window interval {:?}",
                bucket_interval, window_interval
            )));
        }

        debug!(
            name = %options.name,
            limit = options.limit_per_minute,
            window = ?window_interval,
            bucket = ?bucket_interval,
            dev_mode = options.dev_mode,
            "Creating rate limiter"
        );

        Ok(Self {
            name: options.name,
            store,
            limit_per_minute: options.limit_per_minute,
            window_interval,
            bucket_interval,
            write_headers: options.write_headers,
            dev_mode: options.dev_mode,
        })
    }

    /// Decide whether the request for `field` should be throttled.
    ///
    /// The request is counted when admitted. In dev mode the count still
    /// advances but the decision is always "not throttled". Store errors are
    /// returned as-is.
    #[instrument(skip_all, fields(limiter = %self.name, field = %field))]
    pub async fn decide(&self, field: &Field) -> Result<Decision> {
        let key = field.storage_key(&self.name);

        let count = self
            .store
            .increment_and_check(
                &key,
                self.limit_per_minute,
                self.window_interval,
                self.bucket_interval,
            )
            .await?;

        let metadata = self
            .write_headers
            .then(|| RateLimitMetadata::new(self.limit_per_minute, &count));

        if count.throttled {
            debug!(
                key = %key,
                count = count.current_count,
                dev_mode = self.dev_mode,
                "Rate limit exceeded"
            );
        }
        let throttled = count.throttled && !self.dev_mode;

        Ok(Decision {
            throttled,
            count,
            metadata,
        })
    }

    /// Decide for `field` and write rate limit headers into `headers` when
    /// header writing is enabled.
    pub async fn should_throttle(&self, field: &Field, headers: &mut HeaderMap) -> Result<bool> {
        let decision = self.decide(field).await?;
        if let Some(metadata) = decision.metadata {
            metadata.write_to(headers);
        }
        Ok(decision.throttled)
    }

    /// The limiter's namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum admitted requests per window.
    pub fn limit_per_minute(&self) -> u64 {
        self.limit_per_minute
    }

    /// Resolved look-back duration.
    pub fn window_interval(&self) -> Duration {
        self.window_interval
    }

    /// Resolved bucket granularity.
    pub fn bucket_interval(&self) -> Duration {
        self.bucket_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::headers::{RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn limiter(store: Arc<dyn CounterStore>, options: RateLimiterOptions) -> RateLimiter {
        RateLimiter::new(store, options).unwrap()
    }

    /// Records every call and answers with a fixed count.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(String, u64, Duration, Duration)>>,
        reply: Option<WindowCount>,
    }

    #[async_trait]
    impl CounterStore for RecordingStore {
        async fn increment_and_check(
            &self,
            field: &str,
            limit_per_window: u64,
            window_interval: Duration,
            bucket_interval: Duration,
        ) -> Result<WindowCount> {
            self.calls.lock().push((
                field.to_string(),
                limit_per_window,
                window_interval,
                bucket_interval,
            ));
            self.reply
                .ok_or_else(|| SlidewinError::Decode("store unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_defaults_and_key_composition() {
        let store = Arc::new(RecordingStore {
            reply: Some(WindowCount {
                current_count: 0,
                throttled: false,
                earliest_expiry_secs: 60,
            }),
            ..Default::default()
        });
        let limiter = limiter(store.clone(), RateLimiterOptions::new("test", 5));

        assert_eq!(limiter.window_interval(), Duration::from_secs(60));
        assert_eq!(limiter.bucket_interval(), Duration::from_secs(5));

        let decision = limiter.decide(&Field::new("user", "127.0.0.1")).await.unwrap();
        assert!(!decision.throttled);
        assert!(decision.metadata.is_none());

        let calls = store.calls.lock();
        assert_eq!(
            calls.as_slice(),
            &[(
                "test:user:127.0.0.1".to_string(),
                5,
                Duration::from_secs(60),
                Duration::from_secs(5)
            )]
        );
    }

    #[tokio::test]
    async fn test_zero_intervals_take_defaults() {
        let options = RateLimiterOptions {
            window_interval: Some(Duration::ZERO),
            bucket_interval: Some(Duration::ZERO),
            ..RateLimiterOptions::new("test", 1)
        };
        let limiter = limiter(Arc::new(MemoryStore::new()), options);

        assert_eq!(limiter.window_interval(), DEFAULT_WINDOW_INTERVAL);
        assert_eq!(limiter.bucket_interval(), DEFAULT_BUCKET_INTERVAL);
    }

    #[test]
    fn test_rejects_unusable_intervals() {
        let wide_bucket = RateLimiterOptions {
            window_interval: Some(Duration::from_secs(1)),
            bucket_interval: Some(Duration::from_secs(5)),
            ..RateLimiterOptions::new("test", 1)
        };
        assert!(matches!(
            RateLimiter::new(Arc::new(MemoryStore::new()), wide_bucket),
            Err(SlidewinError::InvalidInterval(_))
        ));

        let fractional = RateLimiterOptions {
            bucket_interval: Some(Duration::from_millis(2500)),
            ..RateLimiterOptions::new("test", 1)
        };
        assert!(matches!(
            RateLimiter::new(Arc::new(MemoryStore::new()), fractional),
            Err(SlidewinError::InvalidInterval(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_headers() {
        let options = RateLimiterOptions {
            write_headers: true,
            ..RateLimiterOptions::new("test", 2)
        };
        let limiter = limiter(Arc::new(MemoryStore::new()), options);
        let field = Field::new("test", "127.0.0.1");

        let mut headers = HeaderMap::new();
        let throttled = limiter.should_throttle(&field, &mut headers).await.unwrap();

        assert!(!throttled);
        assert_eq!(headers.get(RATELIMIT_LIMIT).unwrap(), "2");
        assert_eq!(headers.get(RATELIMIT_REMAINING).unwrap(), "2");
        assert!(headers.get(RATELIMIT_RESET).is_some());
    }

    #[tokio::test]
    async fn test_headers_not_written_when_disabled() {
        let limiter = limiter(Arc::new(MemoryStore::new()), RateLimiterOptions::new("test", 2));

        let mut headers = HeaderMap::new();
        limiter
            .should_throttle(&Field::new("test", "127.0.0.1"), &mut headers)
            .await
            .unwrap();

        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_reset_header_omitted_for_zero_expiry() {
        let store = Arc::new(RecordingStore {
            reply: Some(WindowCount {
                current_count: 1,
                throttled: false,
                earliest_expiry_secs: 0,
            }),
            ..Default::default()
        });
        let options = RateLimiterOptions {
            write_headers: true,
            ..RateLimiterOptions::new("test", 3)
        };
        let limiter = limiter(store, options);

        let mut headers = HeaderMap::new();
        limiter
            .should_throttle(&Field::new("test", "127.0.0.1"), &mut headers)
            .await
            .unwrap();

        assert!(headers.get(RATELIMIT_RESET).is_none());
        assert_eq!(headers.get(RATELIMIT_REMAINING).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_throttles_over_limit() {
        let limiter = limiter(Arc::new(MemoryStore::new()), RateLimiterOptions::new("test", 1));
        let field = Field::new("user", "42");

        assert!(!limiter.decide(&field).await.unwrap().throttled);
        assert!(limiter.decide(&field).await.unwrap().throttled);
    }

    #[tokio::test]
    async fn test_dev_mode_never_throttles_but_counts() {
        let store = Arc::new(MemoryStore::new());
        let options = RateLimiterOptions {
            dev_mode: true,
            ..RateLimiterOptions::new("test", 1)
        };
        let dev = limiter(store.clone(), options);
        let field = Field::new("user", "42");

        for _ in 0..3 {
            assert!(!dev.decide(&field).await.unwrap().throttled);
        }

        let last = dev.decide(&field).await.unwrap();
        assert!(!last.throttled);
        assert!(last.count.throttled);
        assert_eq!(last.count.current_count, 1);

        // An enforcing limiter with the same name sees the count dev mode left
        let enforcing = limiter(store, RateLimiterOptions::new("test", 1));
        assert!(enforcing.decide(&field).await.unwrap().throttled);
    }

    #[tokio::test]
    async fn test_names_separate_limiters() {
        let store = Arc::new(MemoryStore::new());
        let login = limiter(store.clone(), RateLimiterOptions::new("login", 1));
        let search = limiter(store, RateLimiterOptions::new("search", 1));
        let field = Field::new("user", "42");

        assert!(!login.decide(&field).await.unwrap().throttled);
        assert!(!search.decide(&field).await.unwrap().throttled);
        assert!(login.decide(&field).await.unwrap().throttled);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let store = Arc::new(RecordingStore::default());
        let options = RateLimiterOptions {
            write_headers: true,
            dev_mode: true,
            ..RateLimiterOptions::new("test", 1)
        };
        let limiter = limiter(store, options);

        let mut headers = HeaderMap::new();
        let result = limiter
            .should_throttle(&Field::new("user", "42"), &mut headers)
            .await;

        assert!(matches!(result, Err(SlidewinError::Decode(_))));
        assert!(headers.is_empty());
    }
}
