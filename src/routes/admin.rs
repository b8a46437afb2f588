use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::coupons::{CouponList, CreateCouponRequest},
    dto::orders::ExpirySweepResult,
    dto::returns::{ReturnRequestList, ReviewReturnRequestRequest},
    entity::orders::OrderStatus,
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Coupon, InventoryMovement, Order, Product, RefundRequest, ReturnRequest},
    response::{ApiResponse, Meta},
    services::{admin_service, coupon_service, order_service, return_service},
    state::AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub initial_stock: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelExpiredRequest {
    pub older_than_minutes: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OutboxDispatchResult {
    pub dispatched: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/returns/pending", get(list_pending_returns))
        .route("/returns/{id}/review", post(review_return_request))
        .route("/refunds/{id}/settle", post(settle_refund))
        .route("/orders/cancel-expired", post(cancel_expired_orders))
        .route("/orders/{id}/status", post(update_order_status))
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/products", post(create_product))
        .route("/inventory/{product_id}/adjust", post(adjust_inventory))
        .route("/inventory/{product_id}/movements", get(list_movements))
        .route("/outbox/dispatch", post(dispatch_outbox))
}

#[utoipa::path(
    get,
    path = "/api/admin/returns/pending",
    responses(
        (status = 200, description = "Requests awaiting review", body = ApiResponse<ReturnRequestList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_pending_returns(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<ReturnRequestList>>> {
    let response = return_service::list_pending(&state, &user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/returns/{id}/review",
    params(("id" = Uuid, Path, description = "Return request ID")),
    request_body = ReviewReturnRequestRequest,
    responses(
        (status = 200, description = "Request resolved", body = ApiResponse<ReturnRequest>),
        (status = 422, description = "Request is not pending"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn review_return_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewReturnRequestRequest>,
) -> AppResult<Json<ApiResponse<ReturnRequest>>> {
    let response = return_service::review_return_request(&state, &user, id, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/refunds/{id}/settle",
    params(("id" = Uuid, Path, description = "Refund request ID")),
    responses(
        (status = 200, description = "Refund settled (idempotent on replay)", body = ApiResponse<RefundRequest>),
        (status = 502, description = "Provider refused the refund"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn settle_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<RefundRequest>>> {
    let response = return_service::settle_refund(&state, &user, id).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/cancel-expired",
    request_body = CancelExpiredRequest,
    responses(
        (status = 200, description = "Stale pending orders swept", body = ApiResponse<ExpirySweepResult>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn cancel_expired_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CancelExpiredRequest>,
) -> AppResult<Json<ApiResponse<ExpirySweepResult>>> {
    crate::middleware::auth::ensure_admin(&user)?;
    let cancelled =
        order_service::cancel_expired_orders(&state, payload.older_than_minutes).await?;
    Ok(Json(ApiResponse::success(
        "Sweep finished",
        ExpirySweepResult { cancelled },
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order moved along the fulfilment chain", body = ApiResponse<Order>),
        (status = 422, description = "Transition not allowed"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let response = admin_service::update_order_status(&state, &user, id, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/admin/coupons",
    responses(
        (status = 200, description = "All coupons", body = ApiResponse<CouponList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CouponList>>> {
    let response = coupon_service::list(&state, &user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 200, description = "Coupon created", body = ApiResponse<Coupon>),
        (status = 422, description = "Code already in use"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCouponRequest>,
) -> AppResult<Json<ApiResponse<Coupon>>> {
    let response = coupon_service::create(&state, &user, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/products",
    request_body = CreateProductRequest,
    responses(
        (status = 200, description = "Product and stock record created", body = ApiResponse<Product>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let response = admin_service::create_product(&state, &user, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/inventory/{product_id}/adjust",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    request_body = InventoryAdjustRequest,
    responses(
        (status = 200, description = "Stock adjusted through the locked engine", body = ApiResponse<serde_json::Value>),
        (status = 409, description = "Lock contention, retry"),
        (status = 422, description = "Insufficient stock"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn adjust_inventory(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<InventoryAdjustRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let response = admin_service::adjust_inventory(&state, &user, product_id, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/admin/inventory/{product_id}/movements",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Append-only movement history, newest first", body = ApiResponse<Vec<InventoryMovement>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<InventoryMovement>>>> {
    let response = admin_service::list_movements(&state, &user, product_id, 100).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/admin/outbox/dispatch",
    responses(
        (status = 200, description = "Pending outbox rows handed to the relay", body = ApiResponse<OutboxDispatchResult>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn dispatch_outbox(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OutboxDispatchResult>>> {
    let dispatched = admin_service::dispatch_outbox(&state, &user, 100).await?;
    Ok(Json(ApiResponse::success(
        "Outbox dispatched",
        OutboxDispatchResult { dispatched },
        Some(Meta::empty()),
    )))
}
