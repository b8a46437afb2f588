use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    config::AppConfig,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            OrderStatus,
        },
        payments::ActiveModel as PaymentActive,
        payments::PaymentStatus,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    outbox,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{cart_service, coupon_service, inventory_service, loyalty_service},
    state::AppState,
};

/// Convert the caller's cart into a payable order: price it, reserve stock
/// line by line under the per-product locks, apply incentives, and commit
/// the lot. Any failure after a stock decrement compensates with the inverse
/// increase so the world is left unchanged.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.shipping_address.trim().is_empty() {
        return Err(AppError::BadRequest("shipping_address is required".into()));
    }
    if payload.payment_method.trim().is_empty() {
        return Err(AppError::BadRequest("payment_method is required".into()));
    }

    let lines = cart_service::load_cart_lines(state, user.user_id).await?;
    if lines.is_empty() {
        return Err(AppError::BusinessRule(
            "Your cart is empty. Add products before checking out.".into(),
        ));
    }

    // Advisory pre-check; the per-product lock in the reservation loop below
    // is the authority.
    for line in &lines {
        if line.cart_item.quantity > line.available_stock {
            return Err(AppError::BusinessRule(format!(
                "Insufficient stock for {}.",
                line.product.name
            )));
        }
    }

    let subtotal: Decimal = lines
        .iter()
        .map(|l| l.product.price * Decimal::from(l.cart_item.quantity))
        .sum();
    let shipping_fee = shipping_fee_for(subtotal, &state.config);

    let coupon = match payload.coupon_code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => Some(coupon_service::validate(&state.orm, code, subtotal).await?),
        None => None,
    };
    let discount_amount = coupon.as_ref().map(|c| c.discount).unwrap_or(Decimal::ZERO);

    let pre_loyalty_total = subtotal - discount_amount + shipping_fee;
    let (loyalty_points, loyalty_discount) = match payload.loyalty_points.unwrap_or(0) {
        p if p > 0 => {
            let available =
                loyalty_service::available_points(&state.orm, user.user_id).await?;
            let step = state.config.loyalty_points_per_unit;
            let applied = loyalty_service::clamp_redemption(
                p,
                available,
                pre_loyalty_total,
                step,
                state.config.loyalty_redemption_floor,
            );
            (applied, loyalty_service::points_to_discount(applied, step))
        }
        _ => (0, Decimal::ZERO),
    };

    let total_amount = pre_loyalty_total - loyalty_discount;

    let order_id = Uuid::new_v4();
    let order_number = build_order_number(order_id);

    let txn = state.orm.begin().await?;

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(order_number.clone()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::PendingPayment),
        subtotal: Set(subtotal),
        shipping_fee: Set(shipping_fee),
        total_amount: Set(total_amount),
        coupon_id: Set(coupon.as_ref().map(|c| c.coupon.id)),
        coupon_code: Set(coupon.as_ref().map(|c| c.coupon.code.clone())),
        discount_amount: Set(discount_amount),
        loyalty_points_used: Set(0),
        loyalty_points_earned: Set(0),
        loyalty_discount_amount: Set(Decimal::ZERO),
        shipping_address: Set(payload.shipping_address.clone()),
        notes: Set(payload.notes.clone().unwrap_or_default()),
        cancelled_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::new();
    for line in &lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product.id),
            quantity: Set(line.cart_item.quantity),
            price_snapshot: Set(line.product.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(item));
    }

    PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        amount: Set(total_amount),
        status: Set(PaymentStatus::Pending),
        payment_method: Set(payload.payment_method.clone()),
        provider_id: Set(None),
        idempotency_key: Set(Uuid::new_v4().to_string()),
        error_message: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    // Reserve stock per line. Each decrement commits under its own
    // per-product lock, so a later failure must undo the earlier ones
    // explicitly before this order transaction is dropped.
    let mut reserved: Vec<(Uuid, i32)> = Vec::new();
    for line in &lines {
        let reservation = inventory_service::decrease(
            state,
            line.product.id,
            line.cart_item.quantity,
            Some(user.user_id),
            &format!("Order reservation {order_number}"),
        )
        .await;

        if let Err(err) = reservation {
            release_reserved(state, &reserved, user.user_id, &order_number).await;
            rollback_quietly(txn).await;
            return Err(err);
        }
        reserved.push((line.product.id, line.cart_item.quantity));
    }

    if let Err(err) = finalize_checkout(
        &txn,
        state,
        user,
        &order,
        coupon.as_ref().map(|c| c.coupon.id),
        loyalty_points,
        loyalty_discount,
    )
    .await
    {
        release_reserved(state, &reserved, user.user_id, &order_number).await;
        rollback_quietly(txn).await;
        return Err(err);
    }

    if let Err(err) = txn.commit().await {
        release_reserved(state, &reserved, user.user_id, &order_number).await;
        return Err(err.into());
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "order_number": order_number,
            "total_amount": total_amount,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    // Re-read so the response carries the loyalty snapshot written above.
    let order = Orders::find_by_id(order.id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

async fn rollback_quietly(txn: DatabaseTransaction) {
    if let Err(err) = txn.rollback().await {
        tracing::warn!(error = %err, "transaction rollback failed");
    }
}

/// Steps that ride on the order transaction after stock is reserved:
/// coupon usage, loyalty redemption, cart clearing, event emission.
async fn finalize_checkout(
    txn: &DatabaseTransaction,
    state: &AppState,
    user: &AuthUser,
    order: &OrderModel,
    coupon_id: Option<Uuid>,
    loyalty_points: i64,
    loyalty_discount: Decimal,
) -> AppResult<()> {
    if let Some(coupon_id) = coupon_id {
        coupon_service::increment_usage(txn, coupon_id).await?;
    }

    if loyalty_points > 0 {
        loyalty_service::redeem(txn, user.user_id, order.id, loyalty_points, loyalty_discount)
            .await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(txn)
        .await?;

    outbox::enqueue(
        txn,
        outbox::ORDER_CREATED,
        serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "user_id": user.user_id,
            "total_amount": order.total_amount,
        }),
    )
    .await?;

    Ok(())
}

/// Compensating rollback: put back every line this checkout already took.
/// Failures are logged, not propagated; the movement ledger keeps the trail.
async fn release_reserved(
    state: &AppState,
    reserved: &[(Uuid, i32)],
    user_id: Uuid,
    order_number: &str,
) {
    for (product_id, qty) in reserved {
        if let Err(err) = inventory_service::increase(
            state,
            *product_id,
            *qty,
            Some(user_id),
            &format!("Checkout rollback {order_number}"),
        )
        .await
        {
            tracing::error!(
                %product_id,
                qty,
                error = %err,
                "failed to release reserved stock during checkout rollback"
            );
        }
    }
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    if order.status != OrderStatus::PendingPayment {
        return Err(AppError::BusinessRule(
            "Only orders awaiting payment can be cancelled.".into(),
        ));
    }

    let (order, items) = cancel_pending_order(&txn, order, "Cancelled by customer").await?;
    txn.commit().await?;

    restore_order_stock(state, &order, &items, Some(user.user_id)).await;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cancel_order",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_number": order.order_number })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let items = items.into_iter().map(order_item_from_entity).collect();
    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Shared cancellation core: flip the status, give back redeemed points,
/// emit the event. Stock restoration happens after commit via
/// `restore_order_stock`.
async fn cancel_pending_order(
    txn: &DatabaseTransaction,
    order: OrderModel,
    note: &str,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(txn)
        .await?;

    loyalty_service::restore(txn, order.user_id, order.id, note).await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.cancelled_at = Set(Some(Utc::now().into()));
    active.updated_at = Set(Utc::now().into());
    let order = active.update(txn).await?;

    outbox::enqueue(
        txn,
        outbox::ORDER_CANCELLED,
        serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "user_id": order.user_id,
            "note": note,
        }),
    )
    .await?;

    Ok((order, items))
}

/// Put every line of a dead order back on the shelf. Runs after the status
/// commit so a retried sweep cannot double-restore; failures are logged and
/// left to the movement ledger.
pub(crate) async fn restore_order_stock(
    state: &AppState,
    order: &OrderModel,
    items: &[OrderItemModel],
    actor: Option<Uuid>,
) {
    for item in items {
        if let Err(err) = inventory_service::increase(
            state,
            item.product_id,
            item.quantity,
            actor,
            &format!("Order cancellation {}", order.order_number),
        )
        .await
        {
            tracing::error!(
                order_id = %order.id,
                product_id = %item.product_id,
                error = %err,
                "failed to restore stock for cancelled order"
            );
        }
    }
}

/// Sweep stale pending-payment orders and give their stock back. Keeps
/// going when one order fails; returns how many were cancelled.
pub async fn cancel_expired_orders(
    state: &AppState,
    older_than_minutes: Option<i64>,
) -> AppResult<usize> {
    let minutes = older_than_minutes.unwrap_or(state.config.pending_order_timeout_minutes);
    let cutoff = Utc::now() - Duration::minutes(minutes);

    let expired = Orders::find()
        .filter(OrderCol::Status.eq(OrderStatus::PendingPayment))
        .filter(OrderCol::CreatedAt.lt(cutoff))
        .all(&state.orm)
        .await?;

    let mut cancelled = 0usize;
    for order in expired {
        let order_id = order.id;
        let result = async {
            let txn = state.orm.begin().await?;
            let (order, items) = cancel_pending_order(
                &txn,
                order,
                "Cancelled by the system: payment window expired",
            )
            .await?;
            txn.commit().await?;
            restore_order_stock(state, &order, &items, None).await;
            Ok::<_, AppError>(())
        }
        .await;

        match result {
            Ok(()) => cancelled += 1,
            Err(err) => {
                tracing::error!(%order_id, error = %err, "expired order sweep failed for order");
            }
        }
    }

    Ok(cancelled)
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::try_from_value(status)
            .map_err(|_| AppError::BadRequest(format!("Invalid order status: {status}")))?;
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub fn shipping_fee_for(subtotal: Decimal, config: &AppConfig) -> Decimal {
    if subtotal >= config.free_shipping_threshold {
        Decimal::ZERO
    } else {
        config.shipping_fee
    }
}

fn build_order_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string().to_uppercase();
    format!("ORD-{}-{}", date, &suffix[..8])
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        status: model.status,
        subtotal: model.subtotal,
        shipping_fee: model.shipping_fee,
        total_amount: model.total_amount,
        coupon_code: model.coupon_code,
        discount_amount: model.discount_amount,
        loyalty_points_used: model.loyalty_points_used,
        loyalty_points_earned: model.loyalty_points_earned,
        loyalty_discount_amount: model.loyalty_discount_amount,
        shipping_address: model.shipping_address,
        cancelled_at: model.cancelled_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price_snapshot: model.price_snapshot,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            redis_url: String::new(),
            host: String::new(),
            port: 0,
            free_shipping_threshold: dec!(1000),
            shipping_fee: dec!(29.90),
            pending_order_timeout_minutes: 30,
            lock_ttl_ms: 10_000,
            lock_wait_ms: 1_500,
            loyalty_points_per_unit: 100,
            loyalty_redemption_floor: dec!(1),
        }
    }

    #[test]
    fn shipping_is_waived_at_the_threshold() {
        let config = test_config();
        assert_eq!(shipping_fee_for(dec!(999.99), &config), dec!(29.90));
        assert_eq!(shipping_fee_for(dec!(1000), &config), dec!(0));
        assert_eq!(shipping_fee_for(dec!(2500), &config), dec!(0));
    }

    #[test]
    fn order_numbers_are_date_stamped_and_uppercase() {
        let number = build_order_number(Uuid::new_v4());
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[2], parts[2].to_uppercase());
    }
}
