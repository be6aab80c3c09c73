//! Charge and customer persistence.
//!
//! The orchestrator talks to the `ChargeStore`/`CustomerStore` traits; the
//! Mongo implementations enforce the invariants the application layer cannot:
//! a unique sparse index on `external_reference` (no two charges may ever
//! share one) and on `idempotency_key`, and status-transition validation on
//! every patch so terminal charges are never rewritten.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Charge, ChargePatch, ChargeStatus, Customer};
use service_core::error::AppError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a charge with the same {field} already exists")]
    Duplicate { field: &'static str },

    #[error("charge not found")]
    NotFound,

    #[error("illegal status transition from {from:?} to {to:?}")]
    InvalidTransition { from: ChargeStatus, to: ChargeStatus },

    /// The row changed between read and conditional write.
    #[error("charge was modified concurrently")]
    ConcurrentUpdate,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => AppError::Conflict(anyhow::Error::new(err)),
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("charge not found")),
            StoreError::InvalidTransition { .. } | StoreError::ConcurrentUpdate => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            StoreError::Backend(err) => AppError::DatabaseError(err),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

#[async_trait]
pub trait ChargeStore: Send + Sync {
    async fn create(&self, charge: Charge) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Charge>, StoreError>;
    async fn find_by_external_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Charge>, StoreError>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Charge>, StoreError>;

    /// Apply a patch to one charge. Status changes are validated against the
    /// state machine; the write is conditional on the status read, so a
    /// concurrent transition surfaces as `ConcurrentUpdate` instead of a
    /// silent overwrite.
    async fn update(&self, id: Uuid, patch: ChargePatch) -> Result<Charge, StoreError>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;
}

#[derive(Clone)]
pub struct MongoChargeStore {
    charges: Collection<Charge>,
}

impl MongoChargeStore {
    pub fn new(db: &Database) -> Self {
        Self {
            charges: db.collection("charges"),
        }
    }

    /// Create the uniqueness indexes the invariants depend on.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        let external_reference_idx = IndexModel::builder()
            .keys(doc! { "external_reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("external_reference_unique_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        let idempotency_key_idx = IndexModel::builder()
            .keys(doc! { "idempotency_key": 1 })
            .options(
                IndexOptions::builder()
                    .name("idempotency_key_unique_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        self.charges
            .create_indexes([external_reference_idx, idempotency_key_idx], None)
            .await?;

        tracing::info!("Charge store indexes initialized");
        Ok(())
    }
}

pub(crate) fn patch_to_set_document(patch: &ChargePatch) -> Result<Document, StoreError> {
    let mut set = Document::new();
    if let Some(status) = patch.status {
        set.insert(
            "status",
            mongodb::bson::to_bson(&status).map_err(anyhow::Error::new)?,
        );
    }
    if let Some(ref reference) = patch.external_reference {
        set.insert("external_reference", reference.clone());
    }
    if let Some(ref url) = patch.payment_url {
        set.insert("payment_url", url.clone());
    }
    if let Some(ref url) = patch.gatekeeper_url {
        set.insert("gatekeeper_url", url.clone());
    }
    if let Some(paid_at) = patch.paid_at {
        set.insert("paid_at", Bson::DateTime(paid_at));
    }
    if let Some(ref notes) = patch.admin_notes {
        set.insert("admin_notes", notes.clone());
    }
    if let Some(ref reference) = patch.refund_reference {
        set.insert("refund_reference", reference.clone());
    }
    Ok(set)
}

#[async_trait]
impl ChargeStore for MongoChargeStore {
    async fn create(&self, charge: Charge) -> Result<(), StoreError> {
        self.charges.insert_one(charge, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                StoreError::Duplicate {
                    field: "external_reference or idempotency_key",
                }
            } else {
                StoreError::Backend(anyhow::Error::new(e))
            }
        })?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Charge>, StoreError> {
        let filter = doc! { "_id": id.to_string() };
        let charge = self
            .charges
            .find_one(filter, None)
            .await
            .map_err(anyhow::Error::new)?;
        Ok(charge)
    }

    async fn find_by_external_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Charge>, StoreError> {
        let filter = doc! { "external_reference": reference };
        let charge = self
            .charges
            .find_one(filter, None)
            .await
            .map_err(anyhow::Error::new)?;
        Ok(charge)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Charge>, StoreError> {
        let filter = doc! { "idempotency_key": key };
        let charge = self
            .charges
            .find_one(filter, None)
            .await
            .map_err(anyhow::Error::new)?;
        Ok(charge)
    }

    async fn update(&self, id: Uuid, patch: ChargePatch) -> Result<Charge, StoreError> {
        let current = self.find_by_id(id).await?.ok_or(StoreError::NotFound)?;

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }
        }

        let set = patch_to_set_document(&patch)?;
        if set.is_empty() {
            return Ok(current);
        }

        // Condition the write on the status we validated against.
        let filter = doc! {
            "_id": id.to_string(),
            "status": mongodb::bson::to_bson(&current.status).map_err(anyhow::Error::new)?,
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .charges
            .find_one_and_update(filter, doc! { "$set": set }, options)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::Duplicate {
                        field: "external_reference",
                    }
                } else {
                    StoreError::Backend(anyhow::Error::new(e))
                }
            })?;

        updated.ok_or(StoreError::ConcurrentUpdate)
    }
}

#[derive(Clone)]
pub struct MongoCustomerStore {
    customers: Collection<Customer>,
}

impl MongoCustomerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            customers: db.collection("customers"),
        }
    }
}

#[async_trait]
impl CustomerStore for MongoCustomerStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let filter = doc! { "_id": id.to_string() };
        let customer = self
            .customers
            .find_one(filter, None)
            .await
            .map_err(anyhow::Error::new)?;
        Ok(customer)
    }
}
