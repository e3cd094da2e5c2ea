//! Redis-backed [`KvStore`].

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::MultiplexedConnection;
use tracing::info;

use super::store::{KvStore, StoreError, ttl_seconds};

const SCAN_BATCH: usize = 200;

// Increment and set the expiry only when the key has none, in one round trip.
// TTL returns -1 for a key without expiry and -2 for a missing key.
static INCR_WITH_TTL: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local value = redis.call('INCRBY', KEYS[1], ARGV[1])
        if redis.call('TTL', KEYS[1]) == -1 then
            redis.call('EXPIRE', KEYS[1], ARGV[2])
        end
        return value
        ",
    )
});

pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Open a multiplexed connection with native response and connect timeouts.
    pub async fn connect(
        url: &str,
        response_timeout: Duration,
        connection_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if response_timeout.is_zero() || connection_timeout.is_zero() {
            return Err(StoreError::invalid_argument(
                "redis timeouts must be greater than zero",
            ));
        }

        let client = redis::Client::open(url)?;
        let config = redis::AsyncConnectionConfig::new()
            .set_response_timeout(response_timeout)
            .set_connection_timeout(connection_timeout);

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    StoreError::Timeout
                } else {
                    StoreError::Connection(err.to_string())
                }
            })?;

        info!(
            backend = "redis",
            addr = %redacted(url),
            "connected to cache store"
        );

        Ok(Self { connection })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl_seconds(ttl)?;
        let mut conn = self.connection.clone();
        let () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn incr_with_ttl(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let seconds = ttl_seconds(ttl)?;
        let mut conn = self.connection.clone();
        let value: i64 = INCR_WITH_TTL
            .key(key)
            .arg(delta)
            .arg(seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let seconds = ttl_seconds(ttl)?;
        let mut conn = self.connection.clone();
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Strip credentials from a connection URL before logging it.
fn redacted(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparsable>".to_string(),
    }
}
