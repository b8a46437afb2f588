use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::return_requests::ReturnKind;
use crate::models::ReturnRequest;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReturnRequestRequest {
    pub kind: ReturnKind,
    pub reason: String,
    pub request_note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewReturnRequestRequest {
    /// `approved` or `rejected`.
    pub decision: ReviewDecision,
    pub review_note: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnRequestList {
    pub items: Vec<ReturnRequest>,
}
