use std::time::Duration;

use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
};

const RETRY_INTERVAL_MS: u64 = 100;

/// An acquired per-product lock. Only the holder of `token` may release it,
/// and the TTL guarantees a crashed holder cannot wedge the product forever.
pub struct StockLock {
    key: String,
    token: String,
}

pub fn product_key(product_id: Uuid) -> String {
    format!("lock:product:{product_id}")
}

/// Try to take the lock with `SET key token NX PX ttl`, retrying within the
/// configured wait budget. Exhausting the budget is a retryable conflict,
/// never an indefinite block.
pub async fn acquire(
    redis: &ConnectionManager,
    config: &AppConfig,
    key: String,
) -> AppResult<StockLock> {
    let token = Uuid::new_v4().to_string();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.lock_wait_ms);
    let mut conn = redis.clone();

    loop {
        let taken: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(config.lock_ttl_ms)
            .query_async(&mut conn)
            .await?;

        if taken.is_some() {
            tracing::debug!(key = %key, "stock lock acquired");
            return Ok(StockLock { key, token });
        }

        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(key = %key, "stock lock wait budget exhausted");
            return Err(AppError::Conflict(
                "The system is busy processing this product, please retry.".into(),
            ));
        }

        tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
    }
}

/// Compare-and-delete so only the acquiring caller can release.
pub async fn release(redis: &ConnectionManager, lock: StockLock) {
    let script = redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    );

    let mut conn = redis.clone();
    let released: Result<i32, redis::RedisError> = script
        .key(&lock.key)
        .arg(&lock.token)
        .invoke_async(&mut conn)
        .await;

    match released {
        Ok(1) => tracing::debug!(key = %lock.key, "stock lock released"),
        Ok(_) => tracing::warn!(key = %lock.key, "stock lock already expired at release"),
        Err(err) => tracing::warn!(key = %lock.key, error = %err, "stock lock release failed"),
    }
}
