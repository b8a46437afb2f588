use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::returns::ReturnRequestList,
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::return_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_own_requests))
}

#[utoipa::path(
    get,
    path = "/api/returns",
    responses(
        (status = 200, description = "Caller's cancellation and return requests", body = ApiResponse<ReturnRequestList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Returns"
)]
pub async fn list_own_requests(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<ReturnRequestList>>> {
    let response = return_service::list_user_requests(&state, &user).await?;
    Ok(Json(response))
}
