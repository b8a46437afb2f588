use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// What the settlement core needs from the card processor. The real
/// integration lives outside this service; the sandbox below stands in for
/// it in development and tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> AppResult<ChargeOutcome>;
    async fn refund(&self, request: RefundChargeRequest) -> AppResult<ChargeOutcome>;
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_number: String,
    pub amount: Decimal,
    pub card_holder_name: String,
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
}

#[derive(Debug, Clone)]
pub struct RefundChargeRequest {
    pub provider_payment_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approved { provider_id: String },
    Declined { reason: String },
}

/// Deterministic stand-in: declines card numbers ending in `0002`
/// (insufficient funds) or `0069` (expired card), approves the rest.
#[derive(Debug, Default)]
pub struct SandboxGateway;

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn charge(&self, request: ChargeRequest) -> AppResult<ChargeOutcome> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::Gateway("charge amount must be positive".into()));
        }

        let digits: String = request
            .card_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.len() < 12 {
            return Ok(ChargeOutcome::Declined {
                reason: "Invalid card number.".into(),
            });
        }

        let outcome = if digits.ends_with("0002") {
            ChargeOutcome::Declined {
                reason: "Insufficient funds.".into(),
            }
        } else if digits.ends_with("0069") {
            ChargeOutcome::Declined {
                reason: "Card expired.".into(),
            }
        } else {
            ChargeOutcome::Approved {
                provider_id: format!("sb_{}", Uuid::new_v4().simple()),
            }
        };

        Ok(outcome)
    }

    async fn refund(&self, request: RefundChargeRequest) -> AppResult<ChargeOutcome> {
        if request.provider_payment_id.is_empty() {
            return Ok(ChargeOutcome::Declined {
                reason: "No provider payment reference.".into(),
            });
        }

        Ok(ChargeOutcome::Approved {
            provider_id: format!("sbr_{}", Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn declines_known_bad_cards_and_approves_the_rest() {
        let gateway = SandboxGateway;
        let base = ChargeRequest {
            order_number: "ORD-20260807-DEADBEEF".into(),
            amount: dec!(100),
            card_holder_name: "Test Buyer".into(),
            card_number: "4242424242420002".into(),
            expiry: "12/30".into(),
            cvv: "123".into(),
        };

        match gateway.charge(base.clone()).await.unwrap() {
            ChargeOutcome::Declined { reason } => assert!(reason.contains("Insufficient")),
            ChargeOutcome::Approved { .. } => panic!("expected decline"),
        }

        let good = ChargeRequest {
            card_number: "4242424242424242".into(),
            ..base
        };
        match gateway.charge(good).await.unwrap() {
            ChargeOutcome::Approved { provider_id } => assert!(provider_id.starts_with("sb_")),
            ChargeOutcome::Declined { reason } => panic!("unexpected decline: {reason}"),
        }
    }

    #[tokio::test]
    async fn refund_requires_a_provider_reference() {
        let gateway = SandboxGateway;
        let outcome = gateway
            .refund(RefundChargeRequest {
                provider_payment_id: String::new(),
                amount: dec!(10),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ChargeOutcome::Declined { .. }));
    }
}
