//! Redis-backed counter store.
//!
//! The whole read-sum-conditional-increment step runs as one Lua script on
//! the Redis server, so concurrent callers never race between the read and
//! the write.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, ErrorKind, Script, Value};
use tracing::{debug, info, trace, warn};

use super::{CounterStore, ScriptReply, WindowCount};
use crate::config::RedisConfig;
use crate::error::{Result, SlidewinError};
use crate::ratelimit::WindowPlan;

/// KEYS: bucket ids, newest first. The write goes to `KEYS[1]` so every
/// touched key is declared, as Redis Cluster requires.
/// ARGV: field, limit, newest bucket id, ttl seconds. `ARGV[3]` is only
/// written when the plan has no buckets.
///
/// Returns `{ counter, throttled, newest_active_bucket }`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local field = ARGV[1]
local limit = tonumber(ARGV[2])
local newest_bucket = KEYS[1] or ARGV[3]
local ttl = tonumber(ARGV[4])
local counter = 0
local newest_active = 0

for _, bucket in ipairs(KEYS) do
    local count = tonumber(redis.call('HGET', bucket, field))
    if count ~= nil and count > 0 then
        counter = counter + count
        local id = tonumber(bucket)
        if id > newest_active then
            newest_active = id
        end
    end
end

if counter >= limit then
    return { counter, 1, newest_active }
end

redis.call('HINCRBY', newest_bucket, field, 1)
redis.call('EXPIRE', newest_bucket, ttl)

return { counter, 0, newest_active }
"#;

/// A counter store shared through a Redis server.
pub struct RedisStore {
    /// Multiplexed connection, reconnects on its own.
    conn: ConnectionManager,
    /// The registered sliding window script.
    script: Script,
    /// Upper bound on a single store call.
    command_timeout: Option<Duration>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("script_sha", &self.script.get_hash())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Register the sliding window script and return a ready store.
    ///
    /// Registration is idempotent; a failure here means the store must not
    /// be used.
    pub async fn new(mut conn: ConnectionManager) -> Result<Self> {
        let script = Script::new(SLIDING_WINDOW_SCRIPT);
        let sha = script
            .prepare_invoke()
            .load_async(&mut conn)
            .await
            .map_err(SlidewinError::Setup)?;

        info!(sha = %sha, "Registered sliding window script");

        Ok(Self {
            conn,
            script,
            command_timeout: None,
        })
    }

    /// Connect using the given configuration.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!(addr = %client.get_connection_info().addr, "Connecting to Redis");

        let conn = ConnectionManager::new(client).await?;
        let store = Self::new(conn).await?;
        Ok(store.with_command_timeout(config.command_timeout()))
    }

    /// Bound every store call by `timeout`.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// SHA1 of the sliding window script.
    pub fn script_sha(&self) -> &str {
        self.script.get_hash()
    }

    /// Run the script, reloading it once if the server lost its script cache.
    async fn eval(&self, cmd: &Cmd) -> Result<Value> {
        let mut conn = self.conn.clone();
        match cmd.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                warn!(sha = %self.script.get_hash(), "Sliding window script missing, reloading");
                self.script
                    .prepare_invoke()
                    .load_async(&mut conn)
                    .await
                    .map_err(SlidewinError::Setup)?;
                Ok(cmd.query_async(&mut conn).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Build the `EVALSHA` call for one window plan.
fn evalsha(sha: &str, plan: &WindowPlan, field: &str, limit_per_window: u64) -> Cmd {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha).arg(plan.buckets().len());
    for bucket in plan.buckets() {
        cmd.arg(*bucket);
    }
    cmd.arg(field)
        .arg(limit_per_window)
        .arg(plan.newest_bucket())
        .arg(plan.ttl_secs());
    cmd
}

#[async_trait]
impl CounterStore for RedisStore {
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

        let cmd = evalsha(self.script.get_hash(), &plan, field, limit_per_window);
        let value = match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, self.eval(&cmd))
                .await
                .map_err(|_| SlidewinError::Timeout(limit))??,
            None => self.eval(&cmd).await?,
        };

        let count = WindowCount::from_reply(&plan, ScriptReply::decode(&value)?);
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
