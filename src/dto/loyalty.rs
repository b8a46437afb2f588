use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::LoyaltyTransaction;

#[derive(Debug, Serialize, ToSchema)]
pub struct LoyaltySummary {
    pub available_points: i64,
    pub available_discount_amount: Decimal,
    pub total_earned_points: i64,
    pub total_redeemed_points: i64,
    pub points_per_unit: i64,
    pub recent_transactions: Vec<LoyaltyTransaction>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoyaltyHistory {
    pub items: Vec<LoyaltyTransaction>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedemptionPreviewRequest {
    pub requested_points: i64,
    pub order_total: Decimal,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct RedemptionPreview {
    pub requested_points: i64,
    pub applied_points: i64,
    pub available_points: i64,
    pub discount_amount: Decimal,
}
