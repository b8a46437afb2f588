use std::env;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    /// Orders at or above this subtotal ship for free.
    pub free_shipping_threshold: Decimal,
    pub shipping_fee: Decimal,
    /// Pending-payment orders older than this are swept by the expiry job.
    pub pending_order_timeout_minutes: i64,
    /// TTL of the per-product stock lock. Must outlive the critical section.
    pub lock_ttl_ms: u64,
    /// Bounded wait for lock acquisition before giving up with a retryable error.
    pub lock_wait_ms: u64,
    /// Loyalty points per currency unit of discount; also the redemption step.
    pub loyalty_points_per_unit: i64,
    /// Redemption must leave at least this much of the order total payable.
    pub loyalty_redemption_floor: Decimal,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        Ok(Self {
            database_url,
            redis_url,
            host,
            port,
            free_shipping_threshold: decimal_env("FREE_SHIPPING_THRESHOLD", dec!(1000)),
            shipping_fee: decimal_env("SHIPPING_FEE", dec!(29.90)),
            pending_order_timeout_minutes: int_env("PENDING_ORDER_TIMEOUT_MINUTES", 30),
            lock_ttl_ms: int_env("STOCK_LOCK_TTL_MS", 10_000) as u64,
            lock_wait_ms: int_env("STOCK_LOCK_WAIT_MS", 1_500) as u64,
            loyalty_points_per_unit: int_env("LOYALTY_POINTS_PER_UNIT", 100),
            loyalty_redemption_floor: decimal_env("LOYALTY_REDEMPTION_FLOOR", dec!(1)),
        })
    }
}

fn decimal_env(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<Decimal>().ok())
        .unwrap_or(default)
}

fn int_env(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
