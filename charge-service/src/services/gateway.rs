//! Payment gateway contract.
//!
//! The orchestrator and reconciliation importer only see this trait; the
//! concrete Stripe client lives in `stripe.rs` and tests inject a fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Definitive instrument decline reported by the gateway.
    #[error("{message}")]
    Declined { code: String, message: String },

    /// The gateway refused the request outright (non-card error body); no
    /// attempt exists upstream.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    /// Transport-level failure; the outcome of the attempt is unknown.
    #[error("gateway request failed: {0}")]
    Unavailable(String),

    /// The gateway answered but not in the shape we expect. The attempt may
    /// still exist upstream, so the outcome is indeterminate.
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

/// Shape of an upstream record, classified by its reference prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Intent-like record (`pi_` prefix).
    Intent,
    /// Charge-like record (`ch_` prefix); resolves to its owning intent when
    /// one exists.
    Charge,
}

impl ReferenceKind {
    pub fn classify(reference: &str) -> Option<Self> {
        if reference.starts_with("pi_") {
            Some(ReferenceKind::Intent)
        } else if reference.starts_with("ch_") {
            Some(ReferenceKind::Charge)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentCharge {
    pub billing_profile_id: String,
    pub instrument_ref: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
}

/// Immediate answer to a charge attempt. `Pending` means the gateway accepted
/// the attempt but the outcome arrives later on the confirmation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayChargeStatus {
    Succeeded,
    Pending,
}

#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub reference: String,
    pub status: GatewayChargeStatus,
}

#[derive(Debug, Clone)]
pub struct PaymentLinkRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Where the gateway sends the guest after completing payment.
    pub success_url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentLink {
    pub reference: String,
    pub url: String,
}

/// A past transaction as the gateway reports it.
#[derive(Debug, Clone)]
pub struct UpstreamTransaction {
    pub reference: String,
    pub kind: ReferenceKind,
    /// The upstream's own status string, reported back to callers verbatim
    /// when the record is not settled.
    pub status: String,
    pub settled: bool,
    pub amount_minor: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub intent_reference: Option<String>,
}

impl UpstreamTransaction {
    /// The reference all duplicate checks key on: a charge-like record is
    /// identified by its owning intent when present.
    pub fn canonical_reference(&self) -> &str {
        self.intent_reference.as_deref().unwrap_or(&self.reference)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RefundReason {
    RequestedByCustomer,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::RequestedByCustomer => "requested_by_customer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub reference: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge a saved instrument against a billing profile, off-session.
    async fn charge_instrument(
        &self,
        request: InstrumentCharge,
    ) -> Result<GatewayCharge, GatewayError>;

    /// Register a newly presented instrument against a billing profile.
    async fn attach_instrument(
        &self,
        billing_profile_id: &str,
        instrument_ref: &str,
    ) -> Result<(), GatewayError>;

    /// Mint a shareable hosted payment link.
    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError>;

    /// Look up a past transaction by its gateway reference.
    async fn retrieve_by_reference(
        &self,
        kind: ReferenceKind,
        reference: &str,
    ) -> Result<UpstreamTransaction, GatewayError>;

    /// Refund a settled transaction.
    async fn refund(
        &self,
        reference: &str,
        reason: RefundReason,
    ) -> Result<GatewayRefund, GatewayError>;
}
