//! Gateway confirmation webhook.
//!
//! The asynchronous channel that eventually flips pending charges to their
//! terminal state. The signature is verified before anything is parsed;
//! processed and ignored events both acknowledge with 200 so the gateway
//! stops redelivering.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};

use service_core::error::AppError;

use crate::services::orchestrator::ConfirmationOutcome;
use crate::AppState;

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing Stripe-Signature header");
            AppError::Unauthorized(anyhow::anyhow!("missing webhook signature"))
        })?;

    let is_valid = state
        .stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("webhook verification failed"))
        })?;

    if !is_valid {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "invalid webhook signature"
        )));
    }

    let event = state.stripe.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("invalid webhook payload"))
    })?;

    let outcome = match event.event_type.as_str() {
        "payment_intent.succeeded" | "checkout.session.completed" => ConfirmationOutcome::Settled,
        "payment_intent.payment_failed" => ConfirmationOutcome::Failed,
        other => {
            tracing::debug!(event_type = %other, "Unhandled webhook event type");
            return Ok(StatusCode::OK);
        }
    };

    tracing::info!(
        event_type = %event.event_type,
        reference = %event.data.object.id,
        "Processing gateway confirmation"
    );

    if let Err(err) = state
        .orchestrator
        .apply_gateway_confirmation(&event.data.object.id, outcome)
        .await
    {
        // Acknowledge anyway; a persistent failure shows up in the logs and
        // the charge stays pending for reconciliation.
        tracing::error!(
            reference = %event.data.object.id,
            error = %err,
            "Failed to apply gateway confirmation"
        );
    }

    Ok(StatusCode::OK)
}
