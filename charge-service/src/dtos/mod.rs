use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Charge, ChargeStatus, PaymentMethod};
use crate::services::orchestrator::{ChargeOutcome, LinkSession, RefundOutcome};

/// Amounts cross the API in minor currency units (cents).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCardChargeRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "instrument_ref is required"))]
    pub instrument_ref: String,
    #[validate(range(min = 1, message = "amount_minor must be positive"))]
    pub amount_minor: i64,
    #[validate(length(min = 3, max = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkSessionRequest {
    pub customer_id: Uuid,
    #[validate(range(min = 1, message = "amount_minor must be positive"))]
    pub amount_minor: i64,
    #[validate(length(min = 3, max = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_hosted_invoice: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateManualTransactionRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "external_transaction_id is required"))]
    pub external_transaction_id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct ChargeOutcomeResponse {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
}

impl From<ChargeOutcome> for ChargeOutcomeResponse {
    fn from(outcome: ChargeOutcome) -> Self {
        Self {
            charge_id: outcome.charge_id,
            status: outcome.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkSessionResponse {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
    pub payment_url: String,
    pub gatekeeper_url: String,
    pub expired_at: String,
}

impl From<LinkSession> for LinkSessionResponse {
    fn from(session: LinkSession) -> Self {
        Self {
            charge_id: session.charge_id,
            status: session.status,
            payment_url: session.payment_url,
            gatekeeper_url: session.gatekeeper_url,
            expired_at: session.expired_at.to_chrono().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub charge_id: Uuid,
    pub refund_reference: String,
}

impl From<RefundOutcome> for RefundResponse {
    fn from(outcome: RefundOutcome) -> Self {
        Self {
            charge_id: outcome.charge_id,
            refund_reference: outcome.refund_reference,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ManualTransactionResponse {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
    pub amount_minor: i64,
    pub amount: String,
    pub currency: String,
    pub external_reference: Option<String>,
}

impl From<Charge> for ManualTransactionResponse {
    fn from(charge: Charge) -> Self {
        Self {
            charge_id: charge.id,
            status: charge.status,
            amount_minor: charge.amount_minor,
            amount: charge.amount_decimal(),
            currency: charge.currency,
            external_reference: charge.external_reference,
        }
    }
}

/// Guest-safe projection: no operator identity, no provenance notes.
#[derive(Debug, Serialize)]
pub struct ChargeProjection {
    pub id: Uuid,
    pub amount_minor: i64,
    pub amount: String,
    pub currency: String,
    pub description: String,
    pub status: ChargeStatus,
    pub payment_method: PaymentMethod,
    pub expired_at: String,
    pub gatekeeper_url: Option<String>,
}

impl From<Charge> for ChargeProjection {
    fn from(charge: Charge) -> Self {
        Self {
            id: charge.id,
            amount_minor: charge.amount_minor,
            amount: charge.amount_decimal(),
            currency: charge.currency.clone(),
            description: charge.description.clone(),
            status: charge.status,
            payment_method: charge.payment_method,
            expired_at: charge.expired_at.to_chrono().to_rfc3339(),
            gatekeeper_url: charge.gatekeeper_url,
        }
    }
}
