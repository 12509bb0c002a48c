use async_trait::async_trait;
use redis::Script;
use std::time::Duration;

use crate::ports::{LockError, LockStore};

/// Deletes the key only when it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock store backed by Redis `SET NX PX`, shared by every instance.
#[derive(Clone)]
pub struct RedisLockStore {
    redis_client: redis::Client,
}

impl RedisLockStore {
    pub fn new(redis_url: &str) -> Result<Self, LockError> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    pub async fn ping(&self) -> Result<(), LockError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
