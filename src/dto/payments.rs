use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessPaymentRequest {
    /// Caller-supplied token making a retried capture attempt safe.
    pub idempotency_key: String,
    pub card_holder_name: String,
    pub card_number: String,
    /// `MM/YY` or `MM/YYYY`.
    pub expiry: String,
    pub cvv: String,
}
