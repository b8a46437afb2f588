use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    entity::{
        inventory_levels::{
            ActiveModel as LevelActive, Column as LevelCol, Entity as InventoryLevels,
            Model as LevelModel,
        },
        inventory_movements::ActiveModel as MovementActive,
    },
    error::{AppError, AppResult},
    lock,
    state::AppState,
};

/// Take `qty` units off the shelf for one product. Serialized against every
/// other mutation of the same product by the external lock; the counter
/// update and its movement row commit in one transaction.
pub async fn decrease(
    state: &AppState,
    product_id: Uuid,
    qty: i32,
    actor: Option<Uuid>,
    reason: &str,
) -> AppResult<()> {
    apply_delta(state, product_id, -qty, actor, reason).await
}

/// Put `qty` units back. Same locking discipline as `decrease`; used by the
/// compensation paths (failed checkout, cancellation, refund) and admin
/// adjustments.
pub async fn increase(
    state: &AppState,
    product_id: Uuid,
    qty: i32,
    actor: Option<Uuid>,
    reason: &str,
) -> AppResult<()> {
    apply_delta(state, product_id, qty, actor, reason).await
}

async fn apply_delta(
    state: &AppState,
    product_id: Uuid,
    delta: i32,
    actor: Option<Uuid>,
    reason: &str,
) -> AppResult<()> {
    if delta == 0 {
        return Err(AppError::BadRequest("quantity must be greater than 0".into()));
    }

    let guard = lock::acquire(
        &state.redis,
        &state.config,
        lock::product_key(product_id),
    )
    .await?;

    let result = mutate_level(state, product_id, delta, actor, reason).await;

    // Release on success and failure alike; the TTL only backstops crashes.
    lock::release(&state.redis, guard).await;

    let new_available = result?;

    if let Err(err) = log_audit(
        &state.pool,
        actor,
        if delta < 0 { "stock_decrease" } else { "stock_increase" },
        Some("inventory_levels"),
        Some(serde_json::json!({
            "product_id": product_id,
            "delta": delta,
            "new_available": new_available,
            "reason": reason,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

async fn mutate_level(
    state: &AppState,
    product_id: Uuid,
    delta: i32,
    actor: Option<Uuid>,
    reason: &str,
) -> AppResult<i32> {
    let txn = state.orm.begin().await?;

    let level = InventoryLevels::find()
        .filter(LevelCol::ProductId.eq(product_id))
        .one(&txn)
        .await?;
    let level = match level {
        Some(l) => l,
        None => {
            return Err(AppError::BusinessRule(format!(
                "No stock record for product {product_id}"
            )));
        }
    };

    let new_available = level.quantity_available + delta;
    if new_available < 0 {
        return Err(AppError::BusinessRule(format!(
            "Insufficient stock. Available: {}, requested: {}",
            level.quantity_available, -delta
        )));
    }

    let mut active: LevelActive = level.into();
    active.quantity_available = Set(new_available);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    MovementActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        user_id: Set(actor),
        delta: Set(delta),
        reason: Set(reason.to_string()),
        notes: Set(Some(format!("Stock adjusted by {delta}"))),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    tracing::debug!(%product_id, delta, new_available, "stock mutated");
    Ok(new_available)
}

pub async fn get_level(state: &AppState, product_id: Uuid) -> AppResult<LevelModel> {
    let level = InventoryLevels::find()
        .filter(LevelCol::ProductId.eq(product_id))
        .one(&state.orm)
        .await?;
    level.ok_or(AppError::NotFound)
}
