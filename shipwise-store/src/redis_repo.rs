use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use serde_json::Value;
use shipwise_core::repository::{StoreResult, TrackingCache};
use tracing::debug;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await
    }

    /// Fixed-window counter; true while `key` is within `limit` for the window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = rate_limit_pipeline(key, window_seconds).query_async(&mut conn).await?;

        Ok(count <= limit)
    }
}

/// INCR, with the expiry set only by the request that opens the window
fn rate_limit_pipeline(key: &str, window_seconds: i64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .incr(key, 1)
        .cmd("EXPIRE")
        .arg(key)
        .arg(window_seconds)
        .arg("NX")
        .ignore();
    pipe
}

fn tracking_key(tracking_number: &str) -> String {
    format!("tracking:{}", tracking_number)
}

#[async_trait]
impl TrackingCache for RedisClient {
    async fn get_tracking(&self, tracking_number: &str) -> StoreResult<Option<Value>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(tracking_key(tracking_number)).await?;
        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_tracking(&self, tracking_number: &str, payload: &Value, ttl_seconds: u64) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(tracking_key(tracking_number), payload.to_string(), ttl_seconds)
            .await?;
        debug!(tracking_number, ttl_seconds, "Cached carrier tracking payload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_expiry_is_only_set_once() {
        let packed = rate_limit_pipeline("ratelimit:10.0.0.7", 60).get_packed_pipeline();
        let text = String::from_utf8_lossy(&packed);

        let expire = text.find("EXPIRE").unwrap();
        let tail = &text[expire..];
        assert!(tail.contains("ratelimit:10.0.0.7"));
        assert!(tail.contains("60"));
        assert!(tail.contains("NX"));
        assert!(text.find("INCR").unwrap() < expire);
    }
}
