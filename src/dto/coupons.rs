use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::coupons::CouponKind;
use crate::models::Coupon;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCouponRequest {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    /// 0 means unlimited.
    pub usage_limit: i32,
    pub expires_at: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponList {
    pub items: Vec<Coupon>,
}
