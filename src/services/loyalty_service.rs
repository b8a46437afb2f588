use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr,
};
use uuid::Uuid;

use crate::{
    dto::loyalty::{LoyaltyHistory, LoyaltySummary, RedemptionPreview},
    entity::loyalty_transactions::{
        ActiveModel as TxnActive, Column as TxnCol, Entity as LoyaltyTransactions, LoyaltyKind,
        Model as TxnModel,
    },
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::LoyaltyTransaction,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Current balance: the sum of every signed delta for the user.
/// Postgres widens SUM(bigint) to numeric, so decode through Decimal.
pub async fn available_points<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<i64> {
    let total: Option<Decimal> = LoyaltyTransactions::find()
        .select_only()
        .column_as(TxnCol::Points.sum(), "total")
        .filter(TxnCol::UserId.eq(user_id))
        .into_tuple()
        .one(conn)
        .await?
        .flatten();
    Ok(total.and_then(|d| d.to_i64()).unwrap_or(0))
}

async fn find_by_order_and_kind<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    kind: LoyaltyKind,
) -> AppResult<Option<TxnModel>> {
    let row = LoyaltyTransactions::find()
        .filter(TxnCol::OrderId.eq(order_id))
        .filter(TxnCol::Kind.eq(kind))
        .all(conn)
        .await?
        .into_iter()
        .next();
    Ok(row)
}

/// Insert a ledger row, treating a (order_id, kind) unique-constraint hit as
/// a safe replay rather than an error.
async fn append_row<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    kind: LoyaltyKind,
    points: i64,
    balance_after: i64,
    description: String,
) -> AppResult<bool> {
    let insert = TxnActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        order_id: Set(order_id),
        kind: Set(kind),
        points: Set(points),
        balance_after: Set(balance_after),
        description: Set(description),
        created_at: NotSet,
    }
    .insert(conn)
    .await;

    match insert {
        Ok(_) => Ok(true),
        Err(err) => {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                tracing::debug!(%order_id, ?kind, "duplicate loyalty row skipped");
                Ok(false)
            } else {
                Err(err.into())
            }
        }
    }
}

/// Grant points for a paid order: 1 point per currency unit, floored.
/// A second call for the same order is a no-op.
pub async fn award<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    order_number: &str,
    paid_amount: Decimal,
) -> AppResult<i64> {
    if find_by_order_and_kind(conn, order_id, LoyaltyKind::Earned)
        .await?
        .is_some()
    {
        return Ok(0);
    }

    let points = paid_amount.max(Decimal::ZERO).floor().to_i64().unwrap_or(0);

    Orders::update_many()
        .col_expr(OrderCol::LoyaltyPointsEarned, Expr::value(points))
        .filter(OrderCol::Id.eq(order_id))
        .exec(conn)
        .await?;

    if points <= 0 {
        return Ok(0);
    }

    let balance = available_points(conn, user_id).await?;
    append_row(
        conn,
        user_id,
        order_id,
        LoyaltyKind::Earned,
        points,
        balance + points,
        format!("Earned on payment of order {order_number}"),
    )
    .await?;

    Ok(points)
}

/// Spend points against an order at checkout. Fails when the balance is
/// short; replays are no-ops thanks to the (order, redeemed) uniqueness.
pub async fn redeem<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    points: i64,
    discount_amount: Decimal,
) -> AppResult<()> {
    if points <= 0 {
        return Ok(());
    }

    if find_by_order_and_kind(conn, order_id, LoyaltyKind::Redeemed)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let balance = available_points(conn, user_id).await?;
    if balance < points {
        return Err(AppError::BusinessRule(
            "Loyalty point balance is insufficient.".into(),
        ));
    }

    append_row(
        conn,
        user_id,
        order_id,
        LoyaltyKind::Redeemed,
        -points,
        balance - points,
        "Redeemed at checkout".to_string(),
    )
    .await?;

    Orders::update_many()
        .col_expr(OrderCol::LoyaltyPointsUsed, Expr::value(points))
        .col_expr(OrderCol::LoyaltyDiscountAmount, Expr::value(discount_amount))
        .filter(OrderCol::Id.eq(order_id))
        .exec(conn)
        .await?;

    Ok(())
}

/// Give back a redemption when the order dies. No-op without a redemption
/// or when already restored.
pub async fn restore<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    description: &str,
) -> AppResult<()> {
    let redeemed = match find_by_order_and_kind(conn, order_id, LoyaltyKind::Redeemed).await? {
        Some(row) => row,
        None => return Ok(()),
    };

    if find_by_order_and_kind(conn, order_id, LoyaltyKind::Restored)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let balance = available_points(conn, user_id).await?;
    let points = redeemed.points.abs();
    append_row(
        conn,
        user_id,
        order_id,
        LoyaltyKind::Restored,
        points,
        balance + points,
        description.to_string(),
    )
    .await?;

    Ok(())
}

/// Claw back an award when the money goes back (refund). No-op without an
/// award or when already reversed.
pub async fn reverse<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    description: &str,
) -> AppResult<()> {
    let earned = match find_by_order_and_kind(conn, order_id, LoyaltyKind::Earned).await? {
        Some(row) if row.points > 0 => row,
        _ => return Ok(()),
    };

    if find_by_order_and_kind(conn, order_id, LoyaltyKind::Reversed)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let balance = available_points(conn, user_id).await?;
    append_row(
        conn,
        user_id,
        order_id,
        LoyaltyKind::Reversed,
        -earned.points,
        balance - earned.points,
        description.to_string(),
    )
    .await?;

    Ok(())
}

/// Round requested points down to the redemption step.
pub fn normalize_points(points: i64, step: i64) -> i64 {
    if points <= 0 { 0 } else { points - points % step }
}

pub fn points_to_discount(points: i64, step: i64) -> Decimal {
    Decimal::from(points) / Decimal::from(step)
}

/// Clamp a redemption request to what the balance and the order total allow,
/// keeping at least `floor` of the total payable.
pub fn clamp_redemption(
    requested: i64,
    available: i64,
    order_total: Decimal,
    step: i64,
    floor: Decimal,
) -> i64 {
    let normalized = normalize_points(requested, step);
    if normalized <= 0 {
        return 0;
    }

    let max_discount = (order_total - floor).max(Decimal::ZERO);
    let affordable = (max_discount * Decimal::from(step))
        .floor()
        .to_i64()
        .unwrap_or(0);
    let affordable = normalize_points(affordable, step);

    normalized.min(available.max(0)).min(affordable)
}

pub async fn redemption_preview(
    state: &AppState,
    user: &AuthUser,
    requested_points: i64,
    order_total: Decimal,
) -> AppResult<ApiResponse<RedemptionPreview>> {
    let config = &state.config;

    if requested_points <= 0 {
        return Ok(ApiResponse::success(
            "OK",
            RedemptionPreview::default(),
            Some(Meta::empty()),
        ));
    }

    let available = available_points(&state.orm, user.user_id).await?;
    if available <= 0 {
        return Err(AppError::BusinessRule(
            "No loyalty points available.".into(),
        ));
    }
    if order_total <= config.loyalty_redemption_floor {
        return Err(AppError::BusinessRule(
            "Order total is too small to redeem points.".into(),
        ));
    }

    let step = config.loyalty_points_per_unit;
    let applied = clamp_redemption(
        requested_points,
        available,
        order_total,
        step,
        config.loyalty_redemption_floor,
    );
    if applied <= 0 {
        return Err(AppError::BusinessRule(format!(
            "Points are redeemed in steps of {step}."
        )));
    }

    Ok(ApiResponse::success(
        "OK",
        RedemptionPreview {
            requested_points,
            applied_points: applied,
            available_points: available,
            discount_amount: points_to_discount(applied, step),
        },
        Some(Meta::empty()),
    ))
}

pub async fn summary(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<LoyaltySummary>> {
    let available = available_points(&state.orm, user.user_id).await?;
    let earned = total_by_kind(&state.orm, user.user_id, LoyaltyKind::Earned).await?;
    let redeemed = total_by_kind(&state.orm, user.user_id, LoyaltyKind::Redeemed)
        .await?
        .abs();

    let recent = LoyaltyTransactions::find()
        .filter(TxnCol::UserId.eq(user.user_id))
        .order_by_desc(TxnCol::CreatedAt)
        .limit(10)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(transaction_from_entity)
        .collect();

    let step = state.config.loyalty_points_per_unit;
    Ok(ApiResponse::success(
        "OK",
        LoyaltySummary {
            available_points: available,
            available_discount_amount: points_to_discount(available.max(0), step),
            total_earned_points: earned,
            total_redeemed_points: redeemed,
            points_per_unit: step,
            recent_transactions: recent,
        },
        Some(Meta::empty()),
    ))
}

pub async fn history(
    state: &AppState,
    user: &AuthUser,
    limit: u64,
) -> AppResult<ApiResponse<LoyaltyHistory>> {
    let items = LoyaltyTransactions::find()
        .filter(TxnCol::UserId.eq(user.user_id))
        .order_by_desc(TxnCol::CreatedAt)
        .limit(limit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(transaction_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        LoyaltyHistory { items },
        Some(Meta::empty()),
    ))
}

async fn total_by_kind<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    kind: LoyaltyKind,
) -> AppResult<i64> {
    let total: Option<Decimal> = LoyaltyTransactions::find()
        .select_only()
        .column_as(TxnCol::Points.sum(), "total")
        .filter(TxnCol::UserId.eq(user_id))
        .filter(TxnCol::Kind.eq(kind))
        .into_tuple()
        .one(conn)
        .await?
        .flatten();
    Ok(total.and_then(|d| d.to_i64()).unwrap_or(0))
}

fn transaction_from_entity(model: TxnModel) -> LoyaltyTransaction {
    LoyaltyTransaction {
        id: model.id,
        order_id: model.order_id,
        kind: model.kind,
        points: model.points,
        balance_after: model.balance_after,
        description: model.description,
        created_at: model.created_at.with_timezone(&chrono::Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn points_normalize_down_to_the_step() {
        assert_eq!(normalize_points(1500, 100), 1500);
        assert_eq!(normalize_points(1575, 100), 1500);
        assert_eq!(normalize_points(99, 100), 0);
        assert_eq!(normalize_points(-5, 100), 0);
    }

    #[test]
    fn redemption_clamps_to_balance_and_order_total() {
        // Plenty of balance, order total is the constraint:
        // 50.00 total minus the 1.00 floor affords 4900 points.
        assert_eq!(clamp_redemption(10_000, 100_000, dec!(50), 100, dec!(1)), 4900);

        // Balance is the constraint.
        assert_eq!(clamp_redemption(10_000, 300, dec!(500), 100, dec!(1)), 300);

        // Requested under one step truncates to nothing.
        assert_eq!(clamp_redemption(40, 10_000, dec!(500), 100, dec!(1)), 0);

        // Requested wins when everything else allows it.
        assert_eq!(clamp_redemption(1200, 10_000, dec!(500), 100, dec!(1)), 1200);
    }

    #[test]
    fn discount_conversion_follows_the_step() {
        assert_eq!(points_to_discount(1500, 100), dec!(15));
        assert_eq!(points_to_discount(0, 100), dec!(0));
    }
}
