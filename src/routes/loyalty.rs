use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};

use crate::{
    dto::loyalty::{LoyaltyHistory, LoyaltySummary, RedemptionPreview, RedemptionPreviewRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::HistoryQuery,
    services::loyalty_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/summary", get(summary))
        .route("/history", get(history))
        .route("/preview", post(redemption_preview))
}

#[utoipa::path(
    get,
    path = "/api/loyalty/summary",
    responses(
        (status = 200, description = "Point balance and recent activity", body = ApiResponse<LoyaltySummary>)
    ),
    security(("bearer_auth" = [])),
    tag = "Loyalty"
)]
pub async fn summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<LoyaltySummary>>> {
    let response = loyalty_service::summary(&state, &user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/loyalty/history",
    params(("limit" = Option<u64>, Query, description = "Max rows, default 50")),
    responses(
        (status = 200, description = "Ledger rows, newest first", body = ApiResponse<LoyaltyHistory>)
    ),
    security(("bearer_auth" = [])),
    tag = "Loyalty"
)]
pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<LoyaltyHistory>>> {
    let response = loyalty_service::history(&state, &user, query.limit.unwrap_or(50)).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/loyalty/preview",
    request_body = RedemptionPreviewRequest,
    responses(
        (status = 200, description = "Points clamped to what this order can redeem", body = ApiResponse<RedemptionPreview>),
        (status = 422, description = "No balance or order total too small"),
    ),
    security(("bearer_auth" = [])),
    tag = "Loyalty"
)]
pub async fn redemption_preview(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RedemptionPreviewRequest>,
) -> AppResult<Json<ApiResponse<RedemptionPreview>>> {
    let response = loyalty_service::redemption_preview(
        &state,
        &user,
        payload.requested_points,
        payload.order_total,
    )
    .await?;
    Ok(Json(response))
}
