use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    gateway::PaymentGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub redis: redis::aio::ConnectionManager,
    pub gateway: Arc<dyn PaymentGateway>,
    pub config: Arc<AppConfig>,
}
