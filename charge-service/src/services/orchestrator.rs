//! Charge orchestration.
//!
//! Owns the lifecycle of every charge: the row is persisted `Pending` before
//! any gateway call (a failed round-trip still leaves an auditable record),
//! gateway outcomes map onto the status state machine, and every creation
//! path cleans up symmetrically. A definitive decline or rejection flips the
//! charge to `Failed`; an indeterminate failure (unreachable gateway, or an
//! answer we could not interpret) leaves it `Pending` for the confirmation
//! channel to resolve.

use chrono::{Duration, Utc};
use mongodb::bson::DateTime;
use std::sync::Arc;
use uuid::Uuid;

use service_core::error::AppError;

use crate::dtos::{CreateCardChargeRequest, CreateLinkSessionRequest};
use crate::models::{Charge, ChargePatch, ChargeStatus, Customer, PaymentMethod};
use crate::services::gateway::{
    GatewayChargeStatus, GatewayError, InstrumentCharge, PaymentGateway, PaymentLinkRequest,
    RefundReason,
};
use crate::services::notifications::{
    Notification, NotificationDispatcher, NotificationError, TemplateType,
};
use crate::services::repository::{ChargeStore, CustomerStore};

/// Card and QR payment links are short-lived.
const CARD_AND_QR_EXPIRY_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone)]
pub struct LinkSession {
    pub charge_id: Uuid,
    pub status: ChargeStatus,
    pub payment_url: String,
    pub gatekeeper_url: String,
    pub expired_at: DateTime,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub charge_id: Uuid,
    pub refund_reference: String,
}

/// What the confirmation channel learned about a pending attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Settled,
    Failed,
}

#[derive(Clone)]
pub struct ChargeOrchestrator {
    charges: Arc<dyn ChargeStore>,
    customers: Arc<dyn CustomerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<dyn NotificationDispatcher>,
    public_base_url: String,
}

impl ChargeOrchestrator {
    pub fn new(
        charges: Arc<dyn ChargeStore>,
        customers: Arc<dyn CustomerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<dyn NotificationDispatcher>,
        public_base_url: String,
    ) -> Self {
        Self {
            charges,
            customers,
            gateway,
            notifications,
            public_base_url,
        }
    }

    /// Charge an instrument already attached to the customer's billing profile.
    pub async fn create_card_charge(
        &self,
        created_by: &str,
        request: CreateCardChargeRequest,
    ) -> Result<ChargeOutcome, AppError> {
        self.check_idempotency_key(request.idempotency_key.as_deref())
            .await?;

        let customer = self.require_customer(request.customer_id).await?;
        let billing_profile_id = customer.billing_profile_id.clone().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "customer has no billing profile; card charges require one"
            ))
        })?;

        let charge = self
            .persist_pending_charge(
                created_by,
                &request.customer_id,
                request.amount_minor,
                &request.currency,
                &request.description,
                PaymentMethod::Card,
                expiry_minutes_from_now(CARD_AND_QR_EXPIRY_MINUTES),
                request.idempotency_key.clone(),
            )
            .await?;

        self.charge_saved_instrument(charge, &billing_profile_id, &request.instrument_ref)
            .await
    }

    /// Attach a newly presented instrument, then charge it.
    pub async fn attach_and_charge(
        &self,
        created_by: &str,
        request: CreateCardChargeRequest,
    ) -> Result<ChargeOutcome, AppError> {
        self.check_idempotency_key(request.idempotency_key.as_deref())
            .await?;

        let customer = self.require_customer(request.customer_id).await?;
        let billing_profile_id = customer.billing_profile_id.clone().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "customer has no billing profile; card charges require one"
            ))
        })?;

        let charge = self
            .persist_pending_charge(
                created_by,
                &request.customer_id,
                request.amount_minor,
                &request.currency,
                &request.description,
                PaymentMethod::Card,
                expiry_minutes_from_now(CARD_AND_QR_EXPIRY_MINUTES),
                request.idempotency_key.clone(),
            )
            .await?;

        if let Err(err) = self
            .gateway
            .attach_instrument(&billing_profile_id, &request.instrument_ref)
            .await
        {
            return Err(self.resolve_gateway_failure(charge.id, err).await);
        }

        self.charge_saved_instrument(charge, &billing_profile_id, &request.instrument_ref)
            .await
    }

    /// Create a QR or hosted-invoice payment link session.
    pub async fn create_link_session(
        &self,
        created_by: &str,
        request: CreateLinkSessionRequest,
    ) -> Result<LinkSession, AppError> {
        self.check_idempotency_key(request.idempotency_key.as_deref())
            .await?;

        let customer = self.require_customer(request.customer_id).await?;

        let (payment_method, expired_at) = if request.is_hosted_invoice {
            let expires_at = request.expires_at.ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "hosted invoices require an explicit expires_at"
                ))
            })?;
            if expires_at <= Utc::now() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "expires_at must be in the future"
                )));
            }
            (PaymentMethod::HostedInvoice, DateTime::from_chrono(expires_at))
        } else {
            (
                PaymentMethod::QrCode,
                expiry_minutes_from_now(CARD_AND_QR_EXPIRY_MINUTES),
            )
        };

        let charge = self
            .persist_pending_charge(
                created_by,
                &request.customer_id,
                request.amount_minor,
                &request.currency,
                &request.description,
                payment_method,
                expired_at,
                request.idempotency_key.clone(),
            )
            .await?;

        let gatekeeper_url = format!("{}/charges/{}/redirect", self.public_base_url, charge.id);
        let link = match self
            .gateway
            .create_payment_link(PaymentLinkRequest {
                amount_minor: request.amount_minor,
                currency: request.currency.clone(),
                description: request.description.clone(),
                expires_at: Some(expired_at.to_chrono()),
                success_url: format!("{}/charges/{}", self.public_base_url, charge.id),
            })
            .await
        {
            Ok(link) => link,
            Err(err) => return Err(self.resolve_gateway_failure(charge.id, err).await),
        };

        let patch = ChargePatch::default()
            .external_reference(link.reference.clone())
            .payment_url(link.url.clone())
            .gatekeeper_url(gatekeeper_url.clone());
        if let Err(err) = self.charges.update(charge.id, patch).await {
            self.mark_failed(charge.id).await;
            return Err(err.into());
        }

        if request.is_hosted_invoice {
            self.dispatch_payment_link_email(&customer, &charge, &link.url, expired_at)
                .await;
        }

        tracing::info!(
            charge_id = %charge.id,
            method = ?payment_method,
            reference = %link.reference,
            "Payment link session created"
        );

        Ok(LinkSession {
            charge_id: charge.id,
            status: ChargeStatus::Pending,
            payment_url: link.url,
            gatekeeper_url,
            expired_at,
        })
    }

    /// Refund a settled charge. Only `Succeeded` charges with a gateway
    /// reference are refundable; a successful refund moves the charge to the
    /// terminal `Refunded` state so it can never pass these checks again.
    pub async fn refund_charge(&self, charge_id: Uuid) -> Result<RefundOutcome, AppError> {
        let charge = self
            .charges
            .find_by_id(charge_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("charge not found")))?;

        let reference = charge.external_reference.clone().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("charge has no gateway reference"))
        })?;

        if charge.status != ChargeStatus::Succeeded {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "only settled charges can be refunded"
            )));
        }

        let refund = self
            .gateway
            .refund(&reference, RefundReason::RequestedByCustomer)
            .await
            .map_err(|err| match err {
                GatewayError::Declined { message, .. } => AppError::GatewayDeclined(message),
                other => AppError::InternalError(anyhow::anyhow!("refund failed: {}", other)),
            })?;

        let patch = ChargePatch::default()
            .status(ChargeStatus::Refunded)
            .refund_reference(refund.reference.clone());
        self.charges.update(charge_id, patch).await?;

        tracing::info!(
            charge_id = %charge_id,
            refund_reference = %refund.reference,
            "Charge refunded"
        );

        Ok(RefundOutcome {
            charge_id,
            refund_reference: refund.reference,
        })
    }

    /// Apply an asynchronous confirmation from the gateway.
    ///
    /// Terminal charges are left untouched so redelivered events are no-ops;
    /// an unknown reference is ignored (the event belongs to someone else).
    pub async fn apply_gateway_confirmation(
        &self,
        external_reference: &str,
        outcome: ConfirmationOutcome,
    ) -> Result<(), AppError> {
        let charge = match self
            .charges
            .find_by_external_reference(external_reference)
            .await?
        {
            Some(charge) => charge,
            None => {
                tracing::debug!(
                    reference = %external_reference,
                    "Confirmation for unknown reference ignored"
                );
                return Ok(());
            }
        };

        if charge.status.is_terminal() {
            tracing::debug!(
                charge_id = %charge.id,
                status = ?charge.status,
                "Confirmation for terminal charge ignored"
            );
            return Ok(());
        }

        let patch = match outcome {
            ConfirmationOutcome::Settled => ChargePatch::default()
                .status(ChargeStatus::Succeeded)
                .paid_at(DateTime::now()),
            ConfirmationOutcome::Failed => ChargePatch::default().status(ChargeStatus::Failed),
        };
        self.charges.update(charge.id, patch).await?;

        tracing::info!(
            charge_id = %charge.id,
            reference = %external_reference,
            outcome = ?outcome,
            "Gateway confirmation applied"
        );
        Ok(())
    }

    async fn charge_saved_instrument(
        &self,
        charge: Charge,
        billing_profile_id: &str,
        instrument_ref: &str,
    ) -> Result<ChargeOutcome, AppError> {
        let attempt = self
            .gateway
            .charge_instrument(InstrumentCharge {
                billing_profile_id: billing_profile_id.to_string(),
                instrument_ref: instrument_ref.to_string(),
                amount_minor: charge.amount_minor,
                currency: charge.currency.clone(),
                description: charge.description.clone(),
            })
            .await;

        let gateway_charge = match attempt {
            Ok(gateway_charge) => gateway_charge,
            Err(err) => return Err(self.resolve_gateway_failure(charge.id, err).await),
        };

        let (status, patch) = match gateway_charge.status {
            GatewayChargeStatus::Succeeded => (
                ChargeStatus::Succeeded,
                ChargePatch::default()
                    .status(ChargeStatus::Succeeded)
                    .external_reference(gateway_charge.reference.clone())
                    .paid_at(DateTime::now()),
            ),
            GatewayChargeStatus::Pending => (
                ChargeStatus::Pending,
                ChargePatch::default().external_reference(gateway_charge.reference.clone()),
            ),
        };

        self.charges.update(charge.id, patch).await?;

        tracing::info!(
            charge_id = %charge.id,
            reference = %gateway_charge.reference,
            status = ?status,
            "Card charge processed"
        );

        Ok(ChargeOutcome {
            charge_id: charge.id,
            status,
        })
    }

    /// A definitive decline or rejection fails the charge (402 or 500); an
    /// indeterminate answer — transport failure, or a response we could not
    /// make sense of — leaves it `Pending`, since the attempt may still exist
    /// upstream and settle through the confirmation channel.
    async fn resolve_gateway_failure(&self, charge_id: Uuid, err: GatewayError) -> AppError {
        match err {
            GatewayError::Declined { code, message } => {
                tracing::warn!(charge_id = %charge_id, %code, "Instrument declined");
                self.mark_failed(charge_id).await;
                AppError::GatewayDeclined(message)
            }
            GatewayError::Rejected(detail) => {
                tracing::error!(charge_id = %charge_id, %detail, "Gateway rejected the request");
                self.mark_failed(charge_id).await;
                AppError::InternalError(anyhow::anyhow!("payment gateway rejected the request"))
            }
            GatewayError::Unavailable(detail) => {
                tracing::error!(charge_id = %charge_id, %detail, "Gateway unreachable");
                AppError::InternalError(anyhow::anyhow!("payment gateway unreachable"))
            }
            GatewayError::Protocol(detail) => {
                tracing::error!(charge_id = %charge_id, %detail, "Unexpected gateway response");
                AppError::InternalError(anyhow::anyhow!("unexpected payment gateway response"))
            }
        }
    }

    async fn mark_failed(&self, charge_id: Uuid) {
        let patch = ChargePatch::default().status(ChargeStatus::Failed);
        if let Err(err) = self.charges.update(charge_id, patch).await {
            tracing::error!(charge_id = %charge_id, error = %err, "Failed to mark charge failed");
        }
    }

    async fn check_idempotency_key(&self, key: Option<&str>) -> Result<(), AppError> {
        if let Some(key) = key {
            if let Some(existing) = self.charges.find_by_idempotency_key(key).await? {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "idempotency key already used by charge {}",
                    existing.id
                )));
            }
        }
        Ok(())
    }

    async fn require_customer(&self, customer_id: Uuid) -> Result<Customer, AppError> {
        self.customers
            .find_by_id(customer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("customer not found")))
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_pending_charge(
        &self,
        created_by: &str,
        customer_id: &Uuid,
        amount_minor: i64,
        currency: &str,
        description: &str,
        payment_method: PaymentMethod,
        expired_at: DateTime,
        idempotency_key: Option<String>,
    ) -> Result<Charge, AppError> {
        let charge = Charge {
            id: Uuid::new_v4(),
            amount_minor,
            currency: currency.to_lowercase(),
            description: description.to_string(),
            customer_id: *customer_id,
            status: ChargeStatus::Pending,
            payment_method,
            external_reference: None,
            payment_url: None,
            gatekeeper_url: None,
            idempotency_key,
            created_by: created_by.to_string(),
            admin_notes: None,
            refund_reference: None,
            created_at: DateTime::now(),
            expired_at,
            paid_at: None,
        };

        tracing::info!(
            charge_id = %charge.id,
            customer_id = %customer_id,
            amount_minor,
            currency = %charge.currency,
            method = ?payment_method,
            "Creating charge"
        );

        self.charges.create(charge.clone()).await?;
        Ok(charge)
    }

    async fn dispatch_payment_link_email(
        &self,
        customer: &Customer,
        charge: &Charge,
        payment_url: &str,
        expired_at: DateTime,
    ) {
        let email = match &customer.email {
            Some(email) => email.clone(),
            None => {
                tracing::debug!(charge_id = %charge.id, "Customer has no email, skipping notification");
                return;
            }
        };

        let notification = Notification {
            template: TemplateType::PaymentLink,
            to: email,
            data: serde_json::json!({
                "customer_name": customer.name,
                "amount": charge.amount_decimal(),
                "currency": charge.currency,
                "description": charge.description,
                "payment_url": payment_url,
                "expires_at": expired_at.to_chrono().to_rfc3339(),
            }),
        };

        match self.notifications.send(notification).await {
            Ok(()) => {}
            Err(NotificationError::Disabled) => {
                tracing::debug!(charge_id = %charge.id, "Notifications disabled")
            }
            Err(err) => {
                // Never roll back the charge for a failed email.
                tracing::error!(charge_id = %charge.id, error = %err, "Payment link email failed");
            }
        }
    }
}

fn expiry_minutes_from_now(minutes: i64) -> DateTime {
    DateTime::from_chrono(Utc::now() + Duration::minutes(minutes))
}

pub(crate) fn expiry_hours_from_now(hours: i64) -> DateTime {
    DateTime::from_chrono(Utc::now() + Duration::hours(hours))
}
