use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    dto::coupons::{CouponList, CreateCouponRequest},
    entity::coupons::{
        ActiveModel as CouponActive, Column as CouponCol, CouponKind, Entity as Coupons,
        Model as CouponModel,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Coupon,
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(Debug, Clone)]
pub struct CouponDiscount {
    pub coupon: CouponModel,
    pub discount: Decimal,
}

/// Validate a coupon against a subtotal. Every rejection carries the
/// specific reason; the caller fails the whole checkout rather than
/// silently dropping the discount.
pub async fn validate<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    subtotal: Decimal,
) -> AppResult<CouponDiscount> {
    let normalized = code.trim().to_uppercase();
    let coupon = Coupons::find()
        .filter(CouponCol::Code.eq(normalized))
        .one(conn)
        .await?;
    let coupon = match coupon {
        Some(c) => c,
        None => return Err(AppError::BusinessRule("Coupon code not found.".into())),
    };

    if !coupon.is_active {
        return Err(AppError::BusinessRule("This coupon is not active.".into()));
    }
    if coupon.expires_at <= Utc::now() {
        return Err(AppError::BusinessRule("This coupon has expired.".into()));
    }
    if coupon.usage_limit > 0 && coupon.used_count >= coupon.usage_limit {
        return Err(AppError::BusinessRule(
            "This coupon has reached its usage limit.".into(),
        ));
    }
    if let Some(min) = coupon.min_order_amount {
        if subtotal < min {
            return Err(AppError::BusinessRule(format!(
                "This coupon requires a minimum order amount of {min}."
            )));
        }
    }

    let discount = compute_discount(coupon.kind, coupon.value, subtotal);
    Ok(CouponDiscount { coupon, discount })
}

/// Percentage coupons round to 2 decimals of the subtotal; fixed-amount
/// coupons are capped at the subtotal so the total never goes negative.
pub fn compute_discount(kind: CouponKind, value: Decimal, subtotal: Decimal) -> Decimal {
    match kind {
        CouponKind::Percentage => (subtotal * value / dec!(100)).round_dp(2),
        CouponKind::FixedAmount => value.min(subtotal),
    }
}

/// Bump `used_count`, guarded by the usage limit in the same statement so
/// concurrent checkouts cannot push it past the cap. Zero rows touched means
/// somebody else took the last slot.
pub async fn increment_usage<C: ConnectionTrait>(conn: &C, coupon_id: Uuid) -> AppResult<()> {
    let result = Coupons::update_many()
        .col_expr(
            CouponCol::UsedCount,
            Expr::col(CouponCol::UsedCount).add(1),
        )
        .col_expr(CouponCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(
            Condition::all().add(CouponCol::Id.eq(coupon_id)).add(
                Condition::any()
                    .add(CouponCol::UsageLimit.eq(0))
                    .add(Expr::col(CouponCol::UsedCount).lt(Expr::col(CouponCol::UsageLimit))),
            ),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::Conflict(
            "Coupon usage limit was reached by a concurrent order.".into(),
        ));
    }
    Ok(())
}

pub async fn create(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;

    if payload.value <= Decimal::ZERO {
        return Err(AppError::BadRequest("value must be positive".into()));
    }
    let code = payload.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("code must not be empty".into()));
    }

    let existing = Coupons::find()
        .filter(CouponCol::Code.eq(code.clone()))
        .one(&state.orm)
        .await?;
    if existing.is_some() {
        return Err(AppError::BusinessRule(
            "This coupon code is already in use.".into(),
        ));
    }

    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        kind: Set(payload.kind),
        value: Set(payload.value),
        min_order_amount: Set(payload.min_order_amount),
        usage_limit: Set(payload.usage_limit),
        used_count: Set(0),
        expires_at: Set(payload.expires_at.into()),
        is_active: Set(true),
        description: Set(payload.description),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Coupon created",
        coupon_from_entity(coupon),
        Some(Meta::empty()),
    ))
}

pub async fn list(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let items = Coupons::find()
        .order_by_desc(CouponCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(coupon_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Coupons",
        CouponList { items },
        Some(Meta::empty()),
    ))
}

pub fn coupon_from_entity(model: CouponModel) -> Coupon {
    Coupon {
        id: model.id,
        code: model.code,
        kind: model.kind,
        value: model.value,
        min_order_amount: model.min_order_amount,
        usage_limit: model.usage_limit,
        used_count: model.used_count,
        expires_at: model.expires_at.with_timezone(&Utc),
        is_active: model.is_active,
        description: model.description,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_discount_rounds_to_two_decimals() {
        let discount = compute_discount(CouponKind::Percentage, dec!(10), dec!(200));
        assert_eq!(discount, dec!(20.00));

        let odd = compute_discount(CouponKind::Percentage, dec!(15), dec!(33.33));
        assert_eq!(odd, dec!(5.00));
    }

    #[test]
    fn fixed_discount_is_capped_at_the_subtotal() {
        assert_eq!(
            compute_discount(CouponKind::FixedAmount, dec!(50), dec!(200)),
            dec!(50)
        );
        assert_eq!(
            compute_discount(CouponKind::FixedAmount, dec!(250), dec!(200)),
            dec!(200)
        );
    }
}
