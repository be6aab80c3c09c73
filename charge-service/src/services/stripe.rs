//! Stripe payment gateway client.
//!
//! Implements the `PaymentGateway` contract over Stripe's form-encoded API:
//! payment intents for card charges, checkout sessions for payment links,
//! refunds, and webhook signature verification for the confirmation channel.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;

use crate::config::StripeConfig;
use crate::services::gateway::{
    GatewayCharge, GatewayChargeStatus, GatewayError, GatewayRefund, InstrumentCharge,
    PaymentGateway, PaymentLink, PaymentLinkRequest, ReferenceKind, RefundReason,
    UpstreamTransaction,
};

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

/// Stripe payment intent, reduced to the fields this service reads.
#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    created: i64,
    #[serde(default)]
    charges: Option<StripeChargeList>,
}

#[derive(Debug, Deserialize)]
struct StripeChargeList {
    #[serde(default)]
    data: Vec<StripeCharge>,
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    id: String,
    status: String,
    paid: bool,
    amount: i64,
    currency: String,
    created: i64,
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

/// Confirmation webhook event, reduced to what the handler routes on.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventObject {
    pub id: String,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        tracing::debug!(%status, path, "Stripe response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| GatewayError::Protocol(e.to_string()))
        } else {
            Err(map_error_body(&body))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| GatewayError::Protocol(e.to_string()))
        } else {
            Err(map_error_body(&body))
        }
    }

    /// Verify the `Stripe-Signature` header against the raw request body.
    ///
    /// The header carries `t=<timestamp>,v1=<hex hmac>`; the signed payload is
    /// `"{timestamp}.{body}"`.
    pub fn verify_webhook_signature(&self, body: &str, header: &str) -> Result<bool, GatewayError> {
        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {}
            }
        }

        let (timestamp, signature) = match (timestamp, signature) {
            (Some(t), Some(v)) => (t, v),
            _ => return Ok(false),
        };

        let payload = format!("{}.{}", timestamp, body);
        let expected = compute_signature(
            &payload,
            self.config.webhook_secret.expose_secret(),
        )?;

        Ok(expected == signature)
    }

    pub fn parse_webhook_event(&self, body: &str) -> Result<StripeEvent, GatewayError> {
        serde_json::from_str(body).map_err(|e| GatewayError::Protocol(e.to_string()))
    }
}

fn compute_signature(payload: &str, secret: &str) -> Result<String, GatewayError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::Protocol("invalid webhook secret length".into()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Translate a Stripe error body: card errors are definitive declines, any
/// other well-formed error body is a definitive rejection. Only an error body
/// we cannot parse at all is indeterminate.
fn map_error_body(body: &str) -> GatewayError {
    match serde_json::from_str::<StripeErrorEnvelope>(body) {
        Ok(envelope) => {
            let detail = envelope.error;
            let message = detail
                .message
                .unwrap_or_else(|| "payment attempt rejected".to_string());
            if detail.error_type == "card_error" {
                GatewayError::Declined {
                    code: detail
                        .decline_code
                        .or(detail.code)
                        .unwrap_or_else(|| "card_declined".to_string()),
                    message,
                }
            } else {
                GatewayError::Rejected(message)
            }
        }
        Err(_) => GatewayError::Protocol(body.to_string()),
    }
}

fn map_intent_status(status: &str) -> Result<GatewayChargeStatus, GatewayError> {
    match status {
        "succeeded" => Ok(GatewayChargeStatus::Succeeded),
        "processing" | "requires_action" | "requires_confirmation" => {
            Ok(GatewayChargeStatus::Pending)
        }
        other => Err(GatewayError::Protocol(format!(
            "unexpected payment intent status: {}",
            other
        ))),
    }
}

fn timestamp_to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn charge_instrument(
        &self,
        request: InstrumentCharge,
    ) -> Result<GatewayCharge, GatewayError> {
        let params = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("customer", request.billing_profile_id.clone()),
            ("payment_method", request.instrument_ref.clone()),
            ("description", request.description.clone()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
        ];

        let intent: StripePaymentIntent = self.post_form("/payment_intents", &params).await?;
        let status = map_intent_status(&intent.status)?;

        tracing::info!(
            reference = %intent.id,
            status = %intent.status,
            amount = intent.amount,
            currency = %intent.currency,
            "Stripe payment intent created"
        );

        Ok(GatewayCharge {
            reference: intent.id,
            status,
        })
    }

    async fn attach_instrument(
        &self,
        billing_profile_id: &str,
        instrument_ref: &str,
    ) -> Result<(), GatewayError> {
        let params = [("customer", billing_profile_id.to_string())];
        let path = format!("/payment_methods/{}/attach", instrument_ref);
        let _: serde_json::Value = self.post_form(&path, &params).await?;

        tracing::info!(
            instrument = %instrument_ref,
            billing_profile = %billing_profile_id,
            "Instrument attached to billing profile"
        );
        Ok(())
    }

    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        let mut params = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
        ];
        if let Some(expires_at) = request.expires_at {
            params.push(("expires_at", expires_at.timestamp().to_string()));
        }

        let session: StripeCheckoutSession = self.post_form("/checkout/sessions", &params).await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Protocol("checkout session carries no url".into()))?;

        tracing::info!(reference = %session.id, "Stripe checkout session created");

        Ok(PaymentLink {
            reference: session.id,
            url,
        })
    }

    async fn retrieve_by_reference(
        &self,
        kind: ReferenceKind,
        reference: &str,
    ) -> Result<UpstreamTransaction, GatewayError> {
        match kind {
            ReferenceKind::Intent => {
                let intent: StripePaymentIntent =
                    self.get_json(&format!("/payment_intents/{}", reference)).await?;
                // Settlement time is when the intent's charge was captured,
                // not when the intent was created; a hosted link can be paid
                // days after it was minted.
                let settled_at = intent
                    .charges
                    .as_ref()
                    .and_then(|charges| charges.data.first())
                    .map(|charge| charge.created)
                    .unwrap_or(intent.created);
                Ok(UpstreamTransaction {
                    settled: intent.status == "succeeded",
                    reference: intent.id,
                    kind,
                    status: intent.status,
                    amount_minor: intent.amount,
                    currency: intent.currency,
                    paid_at: timestamp_to_utc(settled_at),
                    intent_reference: None,
                })
            }
            ReferenceKind::Charge => {
                let charge: StripeCharge =
                    self.get_json(&format!("/charges/{}", reference)).await?;
                Ok(UpstreamTransaction {
                    settled: charge.paid && charge.status == "succeeded",
                    reference: charge.id,
                    kind,
                    status: charge.status,
                    amount_minor: charge.amount,
                    currency: charge.currency,
                    paid_at: timestamp_to_utc(charge.created),
                    intent_reference: charge.payment_intent,
                })
            }
        }
    }

    async fn refund(
        &self,
        reference: &str,
        reason: RefundReason,
    ) -> Result<GatewayRefund, GatewayError> {
        let reference_param = match ReferenceKind::classify(reference) {
            Some(ReferenceKind::Charge) => "charge",
            _ => "payment_intent",
        };
        let params = [
            (reference_param, reference.to_string()),
            ("reason", reason.as_str().to_string()),
        ];

        let refund: StripeRefund = self.post_form("/refunds", &params).await?;

        tracing::info!(
            refund_id = %refund.id,
            reference = %reference,
            "Stripe refund created"
        );

        Ok(GatewayRefund {
            reference: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}
