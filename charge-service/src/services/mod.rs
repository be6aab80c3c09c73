pub mod gateway;
pub mod notifications;
pub mod orchestrator;
pub mod reconciliation;
pub mod repository;
pub mod stripe;

pub use gateway::PaymentGateway;
pub use notifications::{HttpNotificationDispatcher, NotificationDispatcher};
pub use orchestrator::ChargeOrchestrator;
pub use reconciliation::ReconciliationImporter;
pub use repository::{ChargeStore, CustomerStore, MongoChargeStore, MongoCustomerStore};
pub use stripe::StripeGateway;
