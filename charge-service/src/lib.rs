pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{
    ChargeOrchestrator, ChargeStore, CustomerStore, HttpNotificationDispatcher, MongoChargeStore,
    MongoCustomerStore, ReconciliationImporter, StripeGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub charges: Arc<dyn ChargeStore>,
    pub orchestrator: ChargeOrchestrator,
    pub importer: ReconciliationImporter,
    pub stripe: StripeGateway,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/charges/card", post(handlers::charges::create_card_charge))
        .route(
            "/charges/new-card",
            post(handlers::charges::create_new_card_charge),
        )
        .route(
            "/charges/link-session",
            post(handlers::charges::create_link_session),
        )
        .route(
            "/charges/manual-transaction",
            post(handlers::reconciliation::create_manual_transaction),
        )
        .route("/charges/:id", get(handlers::charges::get_charge))
        .route(
            "/charges/:id/redirect",
            get(handlers::charges::redirect_to_payment),
        )
        .route("/charges/:id/refund", post(handlers::charges::refund_charge))
        .route("/webhooks/gateway", post(handlers::webhooks::gateway_webhook))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    operator_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("charge-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let charge_store = MongoChargeStore::new(&db);

        // Uniqueness indexes back the external-reference and idempotency
        // invariants; the service must not run without them.
        charge_store.init_indexes().await?;

        let charges: Arc<dyn ChargeStore> = Arc::new(charge_store);
        let customers: Arc<dyn CustomerStore> = Arc::new(MongoCustomerStore::new(&db));

        let stripe = StripeGateway::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe gateway initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - charge features will be limited");
        }

        let notifications = Arc::new(HttpNotificationDispatcher::new(config.notification.clone()));

        let orchestrator = ChargeOrchestrator::new(
            charges.clone(),
            customers.clone(),
            Arc::new(stripe.clone()),
            notifications,
            config.public_base_url.clone(),
        );

        let importer =
            ReconciliationImporter::new(charges.clone(), customers, Arc::new(stripe.clone()));

        let state = AppState {
            config: config.clone(),
            charges,
            orchestrator,
            importer,
            stripe,
        };

        Ok(Self {
            port: config.server.port,
            router: router(state),
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
