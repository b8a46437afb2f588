use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use sea_orm::ActiveValue::NotSet;
use serde_json::Value;
use uuid::Uuid;

use crate::entity::outbox_messages::{
    ActiveModel as OutboxActive, Column as OutboxCol, Entity as OutboxMessages,
    Model as OutboxModel,
};
use crate::error::AppResult;

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_PAID: &str = "order.paid";
pub const ORDER_CANCELLED: &str = "order.cancelled";
pub const ORDER_REFUNDED: &str = "order.refunded";
pub const RETURN_REQUEST_CREATED: &str = "return_request.created";
pub const RETURN_REQUEST_REVIEWED: &str = "return_request.reviewed";

/// Record the intent to emit a domain event. Runs on the caller's
/// transaction so the event commits together with the state change it
/// announces; a relay dispatches rows asynchronously.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    event_type: &str,
    payload: Value,
) -> Result<(), sea_orm::DbErr> {
    OutboxActive {
        id: Set(Uuid::new_v4()),
        event_type: Set(event_type.to_string()),
        payload: Set(payload),
        created_at: NotSet,
        dispatched_at: Set(None),
    }
    .insert(conn)
    .await?;

    tracing::info!(event_type, "outbox message queued");
    Ok(())
}

pub async fn list_undispatched<C: ConnectionTrait>(
    conn: &C,
    limit: u64,
) -> AppResult<Vec<OutboxModel>> {
    let rows = OutboxMessages::find()
        .filter(OutboxCol::DispatchedAt.is_null())
        .order_by_asc(OutboxCol::CreatedAt)
        .limit(limit)
        .all(conn)
        .await?;
    Ok(rows)
}

pub async fn mark_dispatched<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<()> {
    if let Some(row) = OutboxMessages::find_by_id(id).one(conn).await? {
        let mut active: OutboxActive = row.into();
        active.dispatched_at = Set(Some(Utc::now().into()));
        active.update(conn).await?;
    }
    Ok(())
}
