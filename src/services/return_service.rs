use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::returns::{
        CreateReturnRequestRequest, ReturnRequestList, ReviewDecision, ReviewReturnRequestRequest,
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, OrderStatus},
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments, PaymentStatus,
        },
        refund_requests::{
            ActiveModel as RefundActive, Column as RefundCol, Entity as RefundRequests,
            Model as RefundModel, RefundStatus,
        },
        return_requests::{
            ActiveModel as ReturnActive, Column as ReturnCol, Entity as ReturnRequests,
            Model as ReturnModel, ReturnKind, ReturnStatus,
        },
    },
    error::{AppError, AppResult},
    gateway::{ChargeOutcome, RefundChargeRequest},
    middleware::auth::{AuthUser, ensure_admin},
    models::{RefundRequest, ReturnRequest},
    outbox,
    response::{ApiResponse, Meta},
    services::{loyalty_service, order_service},
    state::AppState,
};

/// Whether the order's current status admits this kind of request:
/// cancellations before fulfilment, returns only after delivery.
pub fn request_allowed(order_status: OrderStatus, kind: ReturnKind) -> bool {
    match kind {
        ReturnKind::Cancellation => matches!(
            order_status,
            OrderStatus::PendingPayment | OrderStatus::Paid | OrderStatus::Processing
        ),
        ReturnKind::Return => order_status == OrderStatus::Delivered,
    }
}

pub async fn create_return_request(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: CreateReturnRequestRequest,
) -> AppResult<ApiResponse<ReturnRequest>> {
    if payload.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reason is required".into()));
    }

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let active_exists = ReturnRequests::find()
        .filter(ReturnCol::OrderId.eq(order_id))
        .filter(ReturnCol::Status.is_in([ReturnStatus::Pending, ReturnStatus::RefundPending]))
        .one(&state.orm)
        .await?
        .is_some();
    if active_exists {
        return Err(AppError::BusinessRule(
            "An active cancellation or return request already exists for this order.".into(),
        ));
    }

    if !request_allowed(order.status, payload.kind) {
        let msg = match payload.kind {
            ReturnKind::Cancellation => format!(
                "A cancellation request cannot be opened while the order is {:?}.",
                order.status
            ),
            ReturnKind::Return => {
                "A return request can only be opened for delivered orders.".to_string()
            }
        };
        return Err(AppError::BusinessRule(msg));
    }

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?;
    let captured = payment
        .as_ref()
        .map(|p| p.status == PaymentStatus::Success)
        .unwrap_or(false);
    let requested_refund = if captured {
        order.total_amount
    } else {
        Decimal::ZERO
    };

    let txn = state.orm.begin().await?;
    let request = ReturnActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        user_id: Set(user.user_id),
        kind: Set(payload.kind),
        status: Set(ReturnStatus::Pending),
        reason: Set(payload.reason.trim().to_string()),
        request_note: Set(payload
            .request_note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)),
        requested_refund_amount: Set(requested_refund),
        reviewed_by_user_id: Set(None),
        review_note: Set(None),
        reviewed_at: Set(None),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    outbox::enqueue(
        &txn,
        outbox::RETURN_REQUEST_CREATED,
        serde_json::json!({
            "return_request_id": request.id,
            "order_id": order_id,
            "user_id": user.user_id,
            "kind": request.kind,
            "requested_refund_amount": requested_refund,
        }),
    )
    .await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "create_return_request",
        Some("return_requests"),
        Some(serde_json::json!({ "order_id": order_id, "kind": request.kind })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Request created",
        return_from_entity(request),
        Some(Meta::empty()),
    ))
}

/// Resolve a pending request. Rejection is terminal. Approval either closes
/// the request outright (nothing was captured) or parks it as refund-pending
/// with exactly one refund request to settle later.
pub async fn review_return_request(
    state: &AppState,
    reviewer: &AuthUser,
    request_id: Uuid,
    payload: ReviewReturnRequestRequest,
) -> AppResult<ApiResponse<ReturnRequest>> {
    ensure_admin(reviewer)?;

    let txn = state.orm.begin().await?;

    let request = ReturnRequests::find_by_id(request_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let request = match request {
        Some(r) => r,
        None => return Err(AppError::NotFound),
    };

    if request.status != ReturnStatus::Pending {
        return Err(AppError::BusinessRule(
            "Only pending requests can be reviewed.".into(),
        ));
    }

    let order = Orders::find_by_id(request.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .one(&txn)
        .await?;
    let captured = payment
        .as_ref()
        .map(|p| p.status == PaymentStatus::Success)
        .unwrap_or(false);

    let mut active: ReturnActive = request.clone().into();
    active.reviewed_by_user_id = Set(Some(reviewer.user_id));
    active.reviewed_at = Set(Some(Utc::now().into()));
    active.review_note = Set(payload
        .review_note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from));

    let mut cancelled_order = None;
    match payload.decision {
        ReviewDecision::Rejected => {
            active.status = Set(ReturnStatus::Rejected);
        }
        ReviewDecision::Approved if captured && request.requested_refund_amount > Decimal::ZERO => {
            active.status = Set(ReturnStatus::RefundPending);

            // Exactly one refund per return request, replay-safe.
            let existing = RefundRequests::find()
                .filter(RefundCol::ReturnRequestId.eq(request.id))
                .one(&txn)
                .await?;
            if existing.is_none() {
                let payment = payment.as_ref().ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("captured order has no payment row"))
                })?;
                RefundActive {
                    id: Set(Uuid::new_v4()),
                    return_request_id: Set(request.id),
                    order_id: Set(request.order_id),
                    payment_id: Set(payment.id),
                    amount: Set(request.requested_refund_amount),
                    status: Set(RefundStatus::Pending),
                    idempotency_key: Set(format!(
                        "refund:{}:{}",
                        request.id,
                        Uuid::new_v4().simple()
                    )),
                    provider_refund_id: Set(None),
                    failure_reason: Set(None),
                    processed_at: Set(None),
                    created_at: NotSet,
                }
                .insert(&txn)
                .await?;
            }
        }
        ReviewDecision::Approved => {
            // Nothing was captured: terminal approval. An approved
            // cancellation also kills the order and frees its stock.
            active.status = Set(ReturnStatus::Approved);
            if request.kind == ReturnKind::Cancellation && order.status != OrderStatus::Cancelled {
                loyalty_service::restore(
                    &txn,
                    order.user_id,
                    order.id,
                    "Cancellation approved",
                )
                .await?;

                let items = OrderItems::find()
                    .filter(OrderItemCol::OrderId.eq(order.id))
                    .all(&txn)
                    .await?;

                let mut order_active: OrderActive = order.clone().into();
                order_active.status = Set(OrderStatus::Cancelled);
                order_active.cancelled_at = Set(Some(Utc::now().into()));
                order_active.updated_at = Set(Utc::now().into());
                let order = order_active.update(&txn).await?;

                outbox::enqueue(
                    &txn,
                    outbox::ORDER_CANCELLED,
                    serde_json::json!({
                        "order_id": order.id,
                        "order_number": order.order_number,
                        "user_id": order.user_id,
                        "note": "cancellation request approved",
                    }),
                )
                .await?;

                cancelled_order = Some((order, items));
            }
        }
    }

    let request = active.update(&txn).await?;

    outbox::enqueue(
        &txn,
        outbox::RETURN_REQUEST_REVIEWED,
        serde_json::json!({
            "return_request_id": request.id,
            "order_id": request.order_id,
            "status": request.status,
            "reviewed_by": reviewer.user_id,
        }),
    )
    .await?;

    txn.commit().await?;

    if let Some((order, items)) = cancelled_order {
        order_service::restore_order_stock(state, &order, &items, Some(reviewer.user_id)).await;
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(reviewer.user_id),
        "review_return_request",
        Some("return_requests"),
        Some(serde_json::json!({ "return_request_id": request.id, "status": request.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Request reviewed",
        return_from_entity(request),
        Some(Meta::empty()),
    ))
}

/// Downstream settlement for an approved refund: drive the provider, then
/// in one commit mark refund/payment/order/request refunded and reverse the
/// incentives. Stock goes back after the commit. Replays of a settled
/// refund return the stored row.
pub async fn settle_refund(
    state: &AppState,
    reviewer: &AuthUser,
    refund_request_id: Uuid,
) -> AppResult<ApiResponse<RefundRequest>> {
    ensure_admin(reviewer)?;

    let refund = RefundRequests::find_by_id(refund_request_id)
        .one(&state.orm)
        .await?;
    let refund = match refund {
        Some(r) => r,
        None => return Err(AppError::NotFound),
    };

    if refund.status == RefundStatus::Succeeded {
        return Ok(ApiResponse::success(
            "Refund already settled",
            refund_from_entity(refund),
            Some(Meta::empty()),
        ));
    }

    let payment = Payments::find_by_id(refund.payment_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let provider_payment_id = match payment.provider_id.clone() {
        Some(id) if !id.is_empty() => id,
        _ => {
            let mut active: RefundActive = refund.into();
            active.status = Set(RefundStatus::Failed);
            active.failure_reason = Set(Some("No payment provider reference.".into()));
            active.processed_at = Set(Some(Utc::now().into()));
            let refund = active.update(&state.orm).await?;
            return Err(AppError::BusinessRule(
                refund.failure_reason.unwrap_or_default(),
            ));
        }
    };

    // Mark processing before the provider call so a crash leaves an
    // explicit in-flight marker.
    let mut active: RefundActive = refund.clone().into();
    active.status = Set(RefundStatus::Processing);
    active.failure_reason = Set(None);
    let refund = active.update(&state.orm).await?;

    let outcome = state
        .gateway
        .refund(RefundChargeRequest {
            provider_payment_id,
            amount: refund.amount,
        })
        .await?;

    match outcome {
        ChargeOutcome::Approved { provider_id } => {
            let txn = state.orm.begin().await?;

            let mut active: RefundActive = refund.into();
            active.status = Set(RefundStatus::Succeeded);
            active.provider_refund_id = Set(Some(provider_id));
            active.processed_at = Set(Some(Utc::now().into()));
            let refund = active.update(&txn).await?;

            let mut payment_active: PaymentActive = payment.into();
            payment_active.status = Set(PaymentStatus::Refunded);
            payment_active.error_message = Set(None);
            payment_active.updated_at = Set(Utc::now().into());
            payment_active.update(&txn).await?;

            let order = Orders::find_by_id(refund.order_id)
                .one(&txn)
                .await?
                .ok_or(AppError::NotFound)?;
            let order_user = order.user_id;
            let order_number = order.order_number.clone();
            let mut order_active: OrderActive = order.clone().into();
            order_active.status = Set(OrderStatus::Refunded);
            order_active.updated_at = Set(Utc::now().into());
            order_active.update(&txn).await?;

            if let Some(request) = ReturnRequests::find_by_id(refund.return_request_id)
                .one(&txn)
                .await?
            {
                let mut request_active: ReturnActive = request.into();
                request_active.status = Set(ReturnStatus::Refunded);
                request_active.update(&txn).await?;
            }

            loyalty_service::reverse(&txn, order_user, refund.order_id, "Order refunded").await?;
            loyalty_service::restore(&txn, order_user, refund.order_id, "Order refunded").await?;

            outbox::enqueue(
                &txn,
                outbox::ORDER_REFUNDED,
                serde_json::json!({
                    "order_id": refund.order_id,
                    "order_number": order_number,
                    "refund_request_id": refund.id,
                    "amount": refund.amount,
                }),
            )
            .await?;

            let items = OrderItems::find()
                .filter(OrderItemCol::OrderId.eq(refund.order_id))
                .all(&txn)
                .await?;

            txn.commit().await?;

            order_service::restore_order_stock(state, &order, &items, Some(reviewer.user_id))
                .await;

            if let Err(err) = log_audit(
                &state.pool,
                Some(reviewer.user_id),
                "settle_refund",
                Some("refund_requests"),
                Some(serde_json::json!({ "refund_request_id": refund.id, "amount": refund.amount })),
            )
            .await
            {
                tracing::warn!(error = %err, "audit log failed");
            }

            Ok(ApiResponse::success(
                "Refund settled",
                refund_from_entity(refund),
                Some(Meta::empty()),
            ))
        }
        ChargeOutcome::Declined { reason } => {
            let mut active: RefundActive = refund.into();
            active.status = Set(RefundStatus::Failed);
            active.failure_reason = Set(Some(reason.clone()));
            active.processed_at = Set(Some(Utc::now().into()));
            active.update(&state.orm).await?;

            tracing::warn!(%refund_request_id, reason = %reason, "refund declined");
            Err(AppError::Gateway(reason))
        }
    }
}

pub async fn list_user_requests(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<ReturnRequestList>> {
    let items = ReturnRequests::find()
        .filter(ReturnCol::UserId.eq(user.user_id))
        .order_by_desc(ReturnCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(return_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        ReturnRequestList { items },
        Some(Meta::empty()),
    ))
}

pub async fn list_pending(
    state: &AppState,
    reviewer: &AuthUser,
) -> AppResult<ApiResponse<ReturnRequestList>> {
    ensure_admin(reviewer)?;
    let items = ReturnRequests::find()
        .filter(ReturnCol::Status.eq(ReturnStatus::Pending))
        .order_by_asc(ReturnCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(return_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        ReturnRequestList { items },
        Some(Meta::empty()),
    ))
}

fn return_from_entity(model: ReturnModel) -> ReturnRequest {
    ReturnRequest {
        id: model.id,
        order_id: model.order_id,
        user_id: model.user_id,
        kind: model.kind,
        status: model.status,
        reason: model.reason,
        request_note: model.request_note,
        requested_refund_amount: model.requested_refund_amount,
        reviewed_by_user_id: model.reviewed_by_user_id,
        review_note: model.review_note,
        reviewed_at: model.reviewed_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn refund_from_entity(model: RefundModel) -> RefundRequest {
    RefundRequest {
        id: model.id,
        return_request_id: model.return_request_id,
        order_id: model.order_id,
        amount: model.amount,
        status: model.status,
        provider_refund_id: model.provider_refund_id,
        failure_reason: model.failure_reason,
        processed_at: model.processed_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_allowed_before_fulfilment_only() {
        for status in [
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Processing,
        ] {
            assert!(request_allowed(status, ReturnKind::Cancellation));
        }
        for status in [
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert!(!request_allowed(status, ReturnKind::Cancellation));
        }
    }

    #[test]
    fn returns_require_delivery() {
        assert!(request_allowed(OrderStatus::Delivered, ReturnKind::Return));
        for status in [
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
        ] {
            assert!(!request_allowed(status, ReturnKind::Return));
        }
    }
}
