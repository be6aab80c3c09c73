//! Reconciliation importer.
//!
//! Folds a transaction that settled entirely outside this system into the
//! charge store as an already-settled charge. The anti-double-entry guard is
//! enforced twice: an application-level lookup on both the supplied and the
//! canonical reference, and the store's unique index on `external_reference`
//! for the window between check and insert.

use mongodb::bson::DateTime;
use std::sync::Arc;
use uuid::Uuid;

use service_core::error::AppError;

use crate::dtos::CreateManualTransactionRequest;
use crate::models::{Charge, ChargeStatus, PaymentMethod};
use crate::services::gateway::{GatewayError, PaymentGateway, ReferenceKind};
use crate::services::orchestrator::expiry_hours_from_now;
use crate::services::repository::{ChargeStore, CustomerStore};

/// Manual backfills carry a cosmetic expiry; the charge is already terminal.
const MANUAL_EXPIRY_HOURS: i64 = 24;

#[derive(Clone)]
pub struct ReconciliationImporter {
    charges: Arc<dyn ChargeStore>,
    customers: Arc<dyn CustomerStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl ReconciliationImporter {
    pub fn new(
        charges: Arc<dyn ChargeStore>,
        customers: Arc<dyn CustomerStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            charges,
            customers,
            gateway,
        }
    }

    pub async fn create_manual_transaction_charge(
        &self,
        created_by: &str,
        request: CreateManualTransactionRequest,
    ) -> Result<Charge, AppError> {
        let external_id = request.external_transaction_id.trim();
        let kind = ReferenceKind::classify(external_id).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "unrecognized external transaction id format: {}",
                external_id
            ))
        })?;

        let upstream = self
            .gateway
            .retrieve_by_reference(kind, external_id)
            .await
            .map_err(|err| match err {
                GatewayError::Unavailable(detail) => {
                    tracing::error!(%detail, "Gateway unreachable during reconciliation");
                    AppError::InternalError(anyhow::anyhow!("payment gateway unreachable"))
                }
                other => AppError::BadRequest(anyhow::anyhow!(
                    "could not retrieve transaction: {}",
                    other
                )),
            })?;

        if !upstream.settled {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "transaction is not settled (upstream status: {})",
                upstream.status
            )));
        }

        // A charge-like record is owned by its intent; a duplicate under
        // either identity means the payment is already recorded.
        let canonical_reference = upstream.canonical_reference().to_string();
        self.reject_if_recorded(external_id).await?;
        if canonical_reference != external_id {
            self.reject_if_recorded(&canonical_reference).await?;
        }

        let customer = self
            .customers
            .find_by_id(request.customer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("customer not found")))?;

        let now = DateTime::now();
        let paid_at = upstream
            .paid_at
            .map(DateTime::from_chrono)
            .unwrap_or(now);

        let charge = Charge {
            id: Uuid::new_v4(),
            amount_minor: upstream.amount_minor,
            currency: upstream.currency.to_lowercase(),
            description: request.description.clone(),
            customer_id: customer.id,
            status: ChargeStatus::Succeeded,
            payment_method: PaymentMethod::ManualTransaction,
            external_reference: Some(canonical_reference.clone()),
            payment_url: None,
            gatekeeper_url: None,
            idempotency_key: None,
            created_by: created_by.to_string(),
            admin_notes: Some(format!(
                "Reconciled from {} record {}",
                kind_label(kind),
                external_id
            )),
            refund_reference: None,
            created_at: now,
            expired_at: expiry_hours_from_now(MANUAL_EXPIRY_HOURS),
            paid_at: Some(paid_at),
        };

        self.charges.create(charge.clone()).await.map_err(|err| {
            // Unique index closes the check-then-act race.
            tracing::warn!(
                reference = %canonical_reference,
                error = %err,
                "Manual transaction insert rejected"
            );
            AppError::from(err)
        })?;

        tracing::info!(
            charge_id = %charge.id,
            reference = %canonical_reference,
            amount_minor = charge.amount_minor,
            "Manual transaction reconciled"
        );

        Ok(charge)
    }

    async fn reject_if_recorded(&self, reference: &str) -> Result<(), AppError> {
        if let Some(existing) = self.charges.find_by_external_reference(reference).await? {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "transaction already recorded as charge {}",
                existing.id
            )));
        }
        Ok(())
    }
}

fn kind_label(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::Intent => "payment intent",
        ReferenceKind::Charge => "charge",
    }
}
