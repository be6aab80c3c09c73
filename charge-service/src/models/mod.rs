use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempt (or confirmed instance) of collecting money from a customer.
///
/// Amounts are stored as an integer count of minor currency units (cents).
/// Conversion to a display string happens only in projections and emails;
/// conversion to the gateway wire format happens only in the gateway client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Charge {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub customer_id: Uuid,
    pub status: ChargeStatus,
    pub payment_method: PaymentMethod,
    /// Gateway identifier for the attempt; unique across all charges.
    pub external_reference: Option<String>,
    pub payment_url: Option<String>,
    pub gatekeeper_url: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_by: String,
    pub admin_notes: Option<String>,
    pub refund_reference: Option<String>,
    pub created_at: DateTime,
    pub expired_at: DateTime,
    pub paid_at: Option<DateTime>,
}

impl Charge {
    pub fn is_expired(&self, now: DateTime) -> bool {
        now > self.expired_at
    }

    /// Major-unit rendering, e.g. 2599 -> "25.99".
    pub fn amount_decimal(&self) -> String {
        format_minor_units(self.amount_minor)
    }
}

pub fn format_minor_units(amount_minor: i64) -> String {
    format!("{}.{:02}", amount_minor / 100, (amount_minor % 100).abs())
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

impl ChargeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChargeStatus::Pending)
    }

    /// Allowed state machine: Pending -> Succeeded | Failed, Succeeded -> Refunded.
    /// Re-stating `Pending` is a harmless no-op; terminal states reject even
    /// their own status, so a terminal row's fields can never be rewritten
    /// through a status-bearing patch.
    pub fn can_transition_to(&self, next: ChargeStatus) -> bool {
        matches!(
            (self, next),
            (ChargeStatus::Pending, ChargeStatus::Pending)
                | (ChargeStatus::Pending, ChargeStatus::Succeeded)
                | (ChargeStatus::Pending, ChargeStatus::Failed)
                | (ChargeStatus::Succeeded, ChargeStatus::Refunded)
        )
    }
}

/// How a charge was initiated, not its settlement state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    QrCode,
    HostedInvoice,
    ManualTransaction,
}

/// Billing-identity holder. Managed elsewhere; this service only reads it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// The customer's identity within the payment gateway. Required for card
    /// charges, optional otherwise.
    pub billing_profile_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
}

/// Explicit partial update for a charge. All fields optional; `apply` is the
/// single place a patch mutates a charge, and stores validate any status
/// change against `ChargeStatus::can_transition_to` before applying it.
#[derive(Debug, Default, Clone)]
pub struct ChargePatch {
    pub status: Option<ChargeStatus>,
    pub external_reference: Option<String>,
    pub payment_url: Option<String>,
    pub gatekeeper_url: Option<String>,
    pub paid_at: Option<DateTime>,
    pub admin_notes: Option<String>,
    pub refund_reference: Option<String>,
}

impl ChargePatch {
    pub fn status(mut self, status: ChargeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn payment_url(mut self, url: impl Into<String>) -> Self {
        self.payment_url = Some(url.into());
        self
    }

    pub fn gatekeeper_url(mut self, url: impl Into<String>) -> Self {
        self.gatekeeper_url = Some(url.into());
        self
    }

    pub fn paid_at(mut self, at: DateTime) -> Self {
        self.paid_at = Some(at);
        self
    }

    pub fn admin_notes(mut self, notes: impl Into<String>) -> Self {
        self.admin_notes = Some(notes.into());
        self
    }

    pub fn refund_reference(mut self, reference: impl Into<String>) -> Self {
        self.refund_reference = Some(reference.into());
        self
    }

    pub fn apply(&self, charge: &mut Charge) {
        if let Some(status) = self.status {
            charge.status = status;
        }
        if let Some(ref reference) = self.external_reference {
            charge.external_reference = Some(reference.clone());
        }
        if let Some(ref url) = self.payment_url {
            charge.payment_url = Some(url.clone());
        }
        if let Some(ref url) = self.gatekeeper_url {
            charge.gatekeeper_url = Some(url.clone());
        }
        if let Some(at) = self.paid_at {
            charge.paid_at = Some(at);
        }
        if let Some(ref notes) = self.admin_notes {
            charge.admin_notes = Some(notes.clone());
        }
        if let Some(ref reference) = self.refund_reference {
            charge.refund_reference = Some(reference.clone());
        }
    }
}
