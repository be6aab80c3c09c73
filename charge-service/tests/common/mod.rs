//! Shared test fixtures: in-memory stores and a scripted gateway, injected
//! through the same traits the Mongo and Stripe implementations use.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mongodb::bson::DateTime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use charge_service::models::{Charge, ChargePatch, ChargeStatus, Customer, PaymentMethod};
use charge_service::services::gateway::{
    GatewayCharge, GatewayChargeStatus, GatewayError, GatewayRefund, InstrumentCharge,
    PaymentGateway, PaymentLink, PaymentLinkRequest, ReferenceKind, RefundReason,
    UpstreamTransaction,
};
use charge_service::services::notifications::{
    Notification, NotificationDispatcher, NotificationError,
};
use charge_service::services::repository::{ChargeStore, CustomerStore, StoreError};
use charge_service::services::{ChargeOrchestrator, ReconciliationImporter};

pub const OPERATOR: &str = "op-frontdesk-1";
pub const PUBLIC_BASE_URL: &str = "http://localhost:3004";

#[derive(Default)]
pub struct InMemoryChargeStore {
    charges: Mutex<HashMap<Uuid, Charge>>,
}

impl InMemoryChargeStore {
    pub fn count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<Charge> {
        self.charges.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Charge> {
        self.charges.lock().unwrap().values().cloned().collect()
    }

    pub fn insert(&self, charge: Charge) {
        self.charges.lock().unwrap().insert(charge.id, charge);
    }
}

#[async_trait]
impl ChargeStore for InMemoryChargeStore {
    async fn create(&self, charge: Charge) -> Result<(), StoreError> {
        let mut charges = self.charges.lock().unwrap();
        if let Some(ref reference) = charge.external_reference {
            if charges
                .values()
                .any(|c| c.external_reference.as_ref() == Some(reference))
            {
                return Err(StoreError::Duplicate {
                    field: "external_reference",
                });
            }
        }
        if let Some(ref key) = charge.idempotency_key {
            if charges
                .values()
                .any(|c| c.idempotency_key.as_ref() == Some(key))
            {
                return Err(StoreError::Duplicate {
                    field: "idempotency_key",
                });
            }
        }
        charges.insert(charge.id, charge);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Charge>, StoreError> {
        Ok(self.charges.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_external_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Charge>, StoreError> {
        Ok(self
            .charges
            .lock()
            .unwrap()
            .values()
            .find(|c| c.external_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Charge>, StoreError> {
        Ok(self
            .charges
            .lock()
            .unwrap()
            .values()
            .find(|c| c.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update(&self, id: Uuid, patch: ChargePatch) -> Result<Charge, StoreError> {
        let mut charges = self.charges.lock().unwrap();

        if let Some(ref reference) = patch.external_reference {
            if charges
                .values()
                .any(|c| c.id != id && c.external_reference.as_ref() == Some(reference))
            {
                return Err(StoreError::Duplicate {
                    field: "external_reference",
                });
            }
        }

        let charge = charges.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(next) = patch.status {
            if !charge.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: charge.status,
                    to: next,
                });
            }
        }
        patch.apply(charge);
        Ok(charge.clone())
    }
}

#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: Mutex<HashMap<Uuid, Customer>>,
}

impl InMemoryCustomerStore {
    pub fn seed(&self, customer: Customer) -> Uuid {
        let id = customer.id;
        self.customers.lock().unwrap().insert(id, customer);
        id
    }

    pub fn seed_with_profile(&self) -> Uuid {
        self.seed(Customer {
            id: Uuid::new_v4(),
            billing_profile_id: Some("cus_test_1".into()),
            name: "Ada Guest".into(),
            email: Some("ada@example.com".into()),
            phone: None,
            nationality: Some("NL".into()),
        })
    }

    pub fn seed_without_profile(&self) -> Uuid {
        self.seed(Customer {
            id: Uuid::new_v4(),
            billing_profile_id: None,
            name: "Ben Guest".into(),
            email: None,
            phone: None,
            nationality: None,
        })
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        Ok(self.customers.lock().unwrap().get(&id).cloned())
    }
}

/// Scripted behavior for the next instrument charge.
#[derive(Clone)]
pub enum ChargeScript {
    Succeed,
    Pend,
    Decline,
    Reject,
    Unavailable,
    Garbled,
}

pub struct FakeGateway {
    pub charge_script: Mutex<ChargeScript>,
    pub attach_error: Mutex<Option<GatewayError>>,
    pub link_error: Mutex<Option<GatewayError>>,
    pub refund_error: Mutex<Option<GatewayError>>,
    pub upstream: Mutex<HashMap<String, UpstreamTransaction>>,
    pub refund_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            charge_script: Mutex::new(ChargeScript::Succeed),
            attach_error: Mutex::new(None),
            link_error: Mutex::new(None),
            refund_error: Mutex::new(None),
            upstream: Mutex::new(HashMap::new()),
            refund_calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }
}

impl FakeGateway {
    pub fn script_charge(&self, script: ChargeScript) {
        *self.charge_script.lock().unwrap() = script;
    }

    pub fn script_attach_failure(&self, err: GatewayError) {
        *self.attach_error.lock().unwrap() = Some(err);
    }

    pub fn script_link_failure(&self, err: GatewayError) {
        *self.link_error.lock().unwrap() = Some(err);
    }

    pub fn seed_upstream(&self, tx: UpstreamTransaction) {
        self.upstream.lock().unwrap().insert(tx.reference.clone(), tx);
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub fn settled_intent(reference: &str, amount_minor: i64) -> UpstreamTransaction {
    UpstreamTransaction {
        reference: reference.to_string(),
        kind: ReferenceKind::Intent,
        status: "succeeded".into(),
        settled: true,
        amount_minor,
        currency: "eur".into(),
        paid_at: Some(Utc::now() - Duration::days(2)),
        intent_reference: None,
    }
}

pub fn settled_charge_record(
    reference: &str,
    intent_reference: Option<&str>,
    amount_minor: i64,
) -> UpstreamTransaction {
    UpstreamTransaction {
        reference: reference.to_string(),
        kind: ReferenceKind::Charge,
        status: "succeeded".into(),
        settled: true,
        amount_minor,
        currency: "eur".into(),
        paid_at: Some(Utc::now() - Duration::days(1)),
        intent_reference: intent_reference.map(str::to_string),
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge_instrument(
        &self,
        _request: InstrumentCharge,
    ) -> Result<GatewayCharge, GatewayError> {
        let script = self.charge_script.lock().unwrap().clone();
        match script {
            ChargeScript::Succeed => Ok(GatewayCharge {
                reference: format!("pi_fake_{}", self.next_id()),
                status: GatewayChargeStatus::Succeeded,
            }),
            ChargeScript::Pend => Ok(GatewayCharge {
                reference: format!("pi_fake_{}", self.next_id()),
                status: GatewayChargeStatus::Pending,
            }),
            ChargeScript::Decline => Err(GatewayError::Declined {
                code: "insufficient_funds".into(),
                message: "Your card has insufficient funds.".into(),
            }),
            ChargeScript::Reject => {
                Err(GatewayError::Rejected("No such payment method".into()))
            }
            ChargeScript::Unavailable => {
                Err(GatewayError::Unavailable("connection reset".into()))
            }
            ChargeScript::Garbled => {
                Err(GatewayError::Protocol("expected value at line 1".into()))
            }
        }
    }

    async fn attach_instrument(
        &self,
        _billing_profile_id: &str,
        _instrument_ref: &str,
    ) -> Result<(), GatewayError> {
        match self.attach_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn create_payment_link(
        &self,
        _request: PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        if let Some(err) = self.link_error.lock().unwrap().clone() {
            return Err(err);
        }
        let id = self.next_id();
        Ok(PaymentLink {
            reference: format!("cs_fake_{}", id),
            url: format!("https://pay.example.com/session/{}", id),
        })
    }

    async fn retrieve_by_reference(
        &self,
        _kind: ReferenceKind,
        reference: &str,
    ) -> Result<UpstreamTransaction, GatewayError> {
        self.upstream
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Protocol(format!("no such transaction: {}", reference)))
    }

    async fn refund(
        &self,
        _reference: &str,
        _reason: RefundReason,
    ) -> Result<GatewayRefund, GatewayError> {
        if let Some(err) = self.refund_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRefund {
            reference: format!("re_fake_{}", self.next_id()),
            status: "succeeded".into(),
        })
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Everything a service-level test needs, wired through the public traits.
pub struct Harness {
    pub charges: Arc<InMemoryChargeStore>,
    pub customers: Arc<InMemoryCustomerStore>,
    pub gateway: Arc<FakeGateway>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub orchestrator: ChargeOrchestrator,
    pub importer: ReconciliationImporter,
}

impl Harness {
    pub fn new() -> Self {
        let charges = Arc::new(InMemoryChargeStore::default());
        let customers = Arc::new(InMemoryCustomerStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let orchestrator = ChargeOrchestrator::new(
            charges.clone(),
            customers.clone(),
            gateway.clone(),
            dispatcher.clone(),
            PUBLIC_BASE_URL.to_string(),
        );
        let importer =
            ReconciliationImporter::new(charges.clone(), customers.clone(), gateway.clone());

        Self {
            charges,
            customers,
            gateway,
            dispatcher,
            orchestrator,
            importer,
        }
    }
}

/// A pending link charge as the orchestrator would have persisted it.
pub fn pending_link_charge(expires_in: Duration) -> Charge {
    let id = Uuid::new_v4();
    Charge {
        id,
        amount_minor: 5000,
        currency: "eur".into(),
        description: "Late checkout".into(),
        customer_id: Uuid::new_v4(),
        status: ChargeStatus::Pending,
        payment_method: PaymentMethod::QrCode,
        external_reference: Some(format!("cs_seed_{}", id.simple())),
        payment_url: Some("https://pay.example.com/session/seed".into()),
        gatekeeper_url: Some(format!("{}/charges/{}/redirect", PUBLIC_BASE_URL, id)),
        idempotency_key: None,
        created_by: OPERATOR.into(),
        admin_notes: None,
        refund_reference: None,
        created_at: DateTime::now(),
        expired_at: DateTime::from_chrono(Utc::now() + expires_in),
        paid_at: None,
    }
}
