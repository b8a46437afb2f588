use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::payments::ProcessPaymentRequest,
    entity::{
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, OrderStatus,
        },
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel, PaymentStatus,
        },
    },
    error::{AppError, AppResult},
    gateway::{ChargeOutcome, ChargeRequest},
    middleware::auth::AuthUser,
    models::Payment,
    outbox,
    response::{ApiResponse, Meta},
    services::loyalty_service,
    state::AppState,
};

/// Capture payment for an order, at most once per (order, idempotency key).
/// The payment row is locked for the whole attempt, so two concurrent
/// captures of the same order serialize here and the loser sees the stored
/// outcome instead of reaching the gateway.
pub async fn process_payment(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: ProcessPaymentRequest,
) -> AppResult<ApiResponse<Payment>> {
    if payload.idempotency_key.trim().is_empty() {
        return Err(AppError::BadRequest("idempotency_key is required".into()));
    }

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

    if order.status == OrderStatus::Cancelled {
        return Err(AppError::BusinessRule(
            "A cancelled order cannot be paid.".into(),
        ));
    }

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let payment = match payment {
        Some(p) => p,
        None => {
            return Err(AppError::BusinessRule(
                "This order has no payment record.".into(),
            ));
        }
    };

    if payment.status == PaymentStatus::Success {
        // A replay of a settled capture returns the stored result without
        // ever contacting the gateway again.
        if payment.idempotency_key == payload.idempotency_key {
            txn.commit().await?;
            return Ok(ApiResponse::success(
                "Payment already captured",
                payment_from_entity(payment),
                Some(Meta::empty()),
            ));
        }
        return Err(AppError::BusinessRule(
            "This order has already been paid.".into(),
        ));
    }

    let outcome = state
        .gateway
        .charge(ChargeRequest {
            order_number: order.order_number.clone(),
            amount: payment.amount,
            card_holder_name: payload.card_holder_name.clone(),
            card_number: payload.card_number.clone(),
            expiry: payload.expiry.clone(),
            cvv: payload.cvv.clone(),
        })
        .await?;

    match outcome {
        ChargeOutcome::Approved { provider_id } => {
            let mut active: PaymentActive = payment.into();
            active.status = Set(PaymentStatus::Success);
            active.provider_id = Set(Some(provider_id));
            active.idempotency_key = Set(payload.idempotency_key.clone());
            active.error_message = Set(None);
            active.updated_at = Set(Utc::now().into());
            let payment = active.update(&txn).await?;

            let order_number = order.order_number.clone();
            let mut order_active: OrderActive = order.into();
            order_active.status = Set(OrderStatus::Paid);
            order_active.updated_at = Set(Utc::now().into());
            let order = order_active.update(&txn).await?;

            loyalty_service::award(
                &txn,
                user.user_id,
                order.id,
                &order_number,
                payment.amount,
            )
            .await?;

            outbox::enqueue(
                &txn,
                outbox::ORDER_PAID,
                serde_json::json!({
                    "order_id": order.id,
                    "order_number": order_number,
                    "user_id": user.user_id,
                    "amount": payment.amount,
                }),
            )
            .await?;

            txn.commit().await?;

            if let Err(err) = log_audit(
                &state.pool,
                Some(user.user_id),
                "payment_captured",
                Some("payments"),
                Some(serde_json::json!({ "order_id": order.id, "amount": payment.amount })),
            )
            .await
            {
                tracing::warn!(error = %err, "audit log failed");
            }

            Ok(ApiResponse::success(
                "Payment captured",
                payment_from_entity(payment),
                Some(Meta::empty()),
            ))
        }
        ChargeOutcome::Declined { reason } => {
            // Record the failed attempt; the order stays payable so the
            // customer can retry with different card details.
            let mut active: PaymentActive = payment.into();
            active.status = Set(PaymentStatus::Failed);
            active.error_message = Set(Some(reason.clone()));
            active.idempotency_key = Set(payload.idempotency_key.clone());
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
            txn.commit().await?;

            tracing::warn!(%order_id, reason = %reason, "payment declined");
            Err(AppError::Gateway(reason))
        }
    }
}

pub async fn get_payment(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?;
    if order.is_none() {
        return Err(AppError::NotFound);
    }

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?;
    match payment {
        Some(p) => Ok(ApiResponse::success(
            "OK",
            payment_from_entity(p),
            Some(Meta::empty()),
        )),
        None => Err(AppError::NotFound),
    }
}

pub fn payment_from_entity(model: PaymentModel) -> Payment {
    Payment {
        id: model.id,
        order_id: model.order_id,
        amount: model.amount,
        status: model.status,
        payment_method: model.payment_method,
        provider_id: model.provider_id,
        idempotency_key: model.idempotency_key,
        error_message: model.error_message,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
