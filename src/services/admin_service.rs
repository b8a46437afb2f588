use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    entity::{
        inventory_levels::ActiveModel as LevelActive,
        inventory_movements::{Column as MovementCol, Entity as InventoryMovements},
        orders::{ActiveModel as OrderActive, Entity as Orders, OrderStatus},
        products::ActiveModel as ProductActive,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{InventoryMovement, Order, Product},
    outbox,
    response::{ApiResponse, Meta},
    routes::admin::{CreateProductRequest, InventoryAdjustRequest, UpdateOrderStatusRequest},
    services::{inventory_service, order_service},
    state::AppState,
};

/// Fulfilment moves forward one step at a time; cancellation and refunds
/// have their own paths and are not reachable from here.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    matches!(
        (from, to),
        (OrderStatus::Paid, OrderStatus::Processing)
            | (OrderStatus::Processing, OrderStatus::Shipped)
            | (OrderStatus::Shipped, OrderStatus::Delivered)
    )
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let order = Orders::find_by_id(order_id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if !can_transition(order.status, payload.status) {
        return Err(AppError::BusinessRule(format!(
            "Order cannot move from {:?} to {:?}.",
            order.status, payload.status
        )));
    }

    let mut active: OrderActive = order.into();
    active.status = Set(payload.status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_service::order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Seed a catalog entry with its stock record. The catalog proper lives in
/// another service; this exists so the settlement core is runnable on its
/// own.
pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    if payload.price <= rust_decimal::Decimal::ZERO {
        return Err(AppError::BadRequest("price must be positive".into()));
    }
    if payload.initial_stock < 0 {
        return Err(AppError::BadRequest("initial_stock must not be negative".into()));
    }

    let txn = state.orm.begin().await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    LevelActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product.id),
        quantity_available: Set(payload.initial_stock),
        quantity_reserved: Set(0),
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    Ok(ApiResponse::success(
        "Product created",
        Product {
            id: product.id,
            name: product.name,
            description: product.description,
            price: product.price,
            is_active: product.is_active,
            created_at: product.created_at.with_timezone(&Utc),
        },
        Some(Meta::empty()),
    ))
}

/// Manual stock correction through the same locked engine the checkout path
/// uses, so the movement ledger stays complete.
pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let reason = payload
        .reason
        .unwrap_or_else(|| "Manual adjustment".to_string());
    if payload.delta > 0 {
        inventory_service::increase(state, product_id, payload.delta, Some(user.user_id), &reason)
            .await?;
    } else {
        inventory_service::decrease(state, product_id, -payload.delta, Some(user.user_id), &reason)
            .await?;
    }

    let level = inventory_service::get_level(state, product_id).await?;
    Ok(ApiResponse::success(
        "Inventory updated",
        serde_json::json!({
            "product_id": product_id,
            "quantity_available": level.quantity_available,
        }),
        Some(Meta::empty()),
    ))
}

/// The movement ledger for a product, newest first. Rows are never edited,
/// so this is the full mutation history for reconciliation.
pub async fn list_movements(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    limit: u64,
) -> AppResult<ApiResponse<Vec<InventoryMovement>>> {
    ensure_admin(user)?;

    let movements = InventoryMovements::find()
        .filter(MovementCol::ProductId.eq(product_id))
        .order_by_desc(MovementCol::CreatedAt)
        .limit(limit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|m| InventoryMovement {
            id: m.id,
            product_id: m.product_id,
            user_id: m.user_id,
            delta: m.delta,
            reason: m.reason,
            notes: m.notes,
            created_at: m.created_at.with_timezone(&Utc),
        })
        .collect();

    Ok(ApiResponse::success(
        "Movements",
        movements,
        Some(Meta::empty()),
    ))
}

/// Relay loop body for the outbox: pretend-dispatch by logging. Real
/// delivery belongs to the messaging collaborator.
pub async fn dispatch_outbox(state: &AppState, user: &AuthUser, limit: u64) -> AppResult<usize> {
    ensure_admin(user)?;

    let pending = outbox::list_undispatched(&state.orm, limit).await?;
    let mut dispatched = 0usize;
    for message in pending {
        tracing::info!(
            event_type = %message.event_type,
            event_id = %message.id,
            "dispatching outbox message"
        );
        outbox::mark_dispatched(&state.orm, message.id).await?;
        dispatched += 1;
    }
    Ok(dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilment_only_moves_forward() {
        assert!(can_transition(OrderStatus::Paid, OrderStatus::Processing));
        assert!(can_transition(OrderStatus::Processing, OrderStatus::Shipped));
        assert!(can_transition(OrderStatus::Shipped, OrderStatus::Delivered));

        assert!(!can_transition(OrderStatus::PendingPayment, OrderStatus::Paid));
        assert!(!can_transition(OrderStatus::Paid, OrderStatus::Delivered));
        assert!(!can_transition(OrderStatus::Delivered, OrderStatus::Shipped));
        assert!(!can_transition(OrderStatus::Paid, OrderStatus::Cancelled));
    }
}
