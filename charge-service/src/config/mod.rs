use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub notification: NotificationConfig,
    /// Public base URL of this service; gatekeeper redirect URLs are minted
    /// under it.
    pub public_base_url: String,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NotificationConfig {
    pub base_url: String,
    pub enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("CHARGE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("CHARGE_SERVICE_PORT")
            .unwrap_or_else(|_| "3004".to_string())
            .parse()?;

        let db_url = env::var("CHARGE_DATABASE_URL").expect("CHARGE_DATABASE_URL must be set");
        let db_name =
            env::var("CHARGE_DATABASE_NAME").unwrap_or_else(|_| "charge_db".to_string());

        let stripe_secret_key =
            env::var("STRIPE_SECRET_KEY").unwrap_or_else(|_| "".to_string());
        let stripe_webhook_secret =
            env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_else(|_| "".to_string());
        let stripe_api_base_url = env::var("STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());

        let notification_base_url = env::var("NOTIFICATION_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:3005".to_string());
        let notification_enabled = env::var("NOTIFICATION_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let public_base_url = env::var("CHARGE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_secret_key),
                webhook_secret: Secret::new(stripe_webhook_secret),
                api_base_url: stripe_api_base_url,
            },
            notification: NotificationConfig {
                base_url: notification_base_url,
                enabled: notification_enabled,
            },
            public_base_url,
            service_name: "charge-service".to_string(),
        })
    }
}
