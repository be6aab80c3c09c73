//! Client for the notification service.
//!
//! Dispatch is fire-and-forget from the orchestrator's point of view: a
//! failed send is logged and never rolls back a charge.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::NotificationConfig;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),

    #[error("notifications are disabled")]
    Disabled,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    PaymentLink,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub template: TemplateType,
    pub to: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Clone)]
pub struct HttpNotificationDispatcher {
    client: reqwest::Client,
    config: NotificationConfig,
}

impl HttpNotificationDispatcher {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        if !self.config.enabled {
            return Err(NotificationError::Disabled);
        }

        let url = format!("{}/notifications/email", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| NotificationError::Dispatch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Dispatch(format!(
                "notification service answered {}",
                response.status()
            )));
        }

        tracing::info!(to = %notification.to, "Notification dispatched");
        Ok(())
    }
}
