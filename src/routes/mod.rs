use axum::Router;

use crate::state::AppState;

pub mod admin;
pub mod cart;
pub mod doc;
pub mod health;
pub mod loyalty;
pub mod orders;
pub mod params;
pub mod payments;
pub mod returns;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
        .nest("/loyalty", loyalty::router())
        .nest("/returns", returns::router())
        .nest("/admin", admin::router())
}
