use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::ProcessPaymentRequest,
    error::AppResult,
    middleware::auth::AuthUser,
    models::Payment,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/{order_id}", post(process_payment).get(get_payment))
}

#[utoipa::path(
    post,
    path = "/api/payments/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = ProcessPaymentRequest,
    responses(
        (status = 200, description = "Payment captured (or replayed idempotently)", body = ApiResponse<Payment>),
        (status = 422, description = "Order cancelled or already paid under another key"),
        (status = 502, description = "Gateway declined the charge"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn process_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let response = payment_service::process_payment(&state, &user, order_id, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/payments/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment for the order", body = ApiResponse<Payment>),
        (status = 404, description = "Not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let response = payment_service::get_payment(&state, &user, order_id).await?;
    Ok(Json(response))
}
