//! Charge endpoints: creation paths for operators, status/redirect gatekeeper
//! for guests following a payment link, and refunds.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::DateTime;
use uuid::Uuid;
use validator::Validate;

use service_core::error::AppError;

use crate::dtos::{
    ChargeOutcomeResponse, ChargeProjection, CreateCardChargeRequest, CreateLinkSessionRequest,
    LinkSessionResponse, RefundResponse,
};
use crate::middleware::OperatorContext;
use crate::models::ChargeStatus;
use crate::AppState;

/// `POST /charges/card` — charge a saved instrument.
pub async fn create_card_charge(
    State(state): State<AppState>,
    operator: OperatorContext,
    Json(payload): Json<CreateCardChargeRequest>,
) -> Result<(StatusCode, Json<ChargeOutcomeResponse>), AppError> {
    payload.validate()?;

    let outcome = state
        .orchestrator
        .create_card_charge(&operator.operator_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// `POST /charges/new-card` — attach a new instrument, then charge it.
pub async fn create_new_card_charge(
    State(state): State<AppState>,
    operator: OperatorContext,
    Json(payload): Json<CreateCardChargeRequest>,
) -> Result<(StatusCode, Json<ChargeOutcomeResponse>), AppError> {
    payload.validate()?;

    let outcome = state
        .orchestrator
        .attach_and_charge(&operator.operator_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// `POST /charges/link-session` — mint a QR or hosted-invoice payment link.
pub async fn create_link_session(
    State(state): State<AppState>,
    operator: OperatorContext,
    Json(payload): Json<CreateLinkSessionRequest>,
) -> Result<(StatusCode, Json<LinkSessionResponse>), AppError> {
    payload.validate()?;

    let session = state
        .orchestrator
        .create_link_session(&operator.operator_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

/// `GET /charges/:id` — guest-safe projection.
pub async fn get_charge(
    State(state): State<AppState>,
    Path(charge_id): Path<Uuid>,
) -> Result<Json<ChargeProjection>, AppError> {
    let charge = state
        .charges
        .find_by_id(charge_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("charge not found")))?;

    Ok(Json(ChargeProjection::from(charge)))
}

/// `GET /charges/:id/redirect` — the gatekeeper a guest's browser hits from a
/// payment link. Expiry is absolute and checked before status; a settled
/// charge never redirects, preventing double payment. Persisted state is
/// always re-read, never trusted from the caller.
pub async fn redirect_to_payment(
    State(state): State<AppState>,
    Path(charge_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let charge = state
        .charges
        .find_by_id(charge_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("charge not found")))?;

    if charge.is_expired(DateTime::now()) {
        return Err(AppError::BadRequest(anyhow::anyhow!("payment link expired")));
    }

    if matches!(
        charge.status,
        ChargeStatus::Succeeded | ChargeStatus::Refunded
    ) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "charge already completed"
        )));
    }

    let payment_url = charge.payment_url.ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("charge has no payment link"))
    })?;

    Ok((StatusCode::FOUND, [(header::LOCATION, payment_url)]).into_response())
}

/// `POST /charges/:id/refund` — refund a settled charge.
pub async fn refund_charge(
    State(state): State<AppState>,
    operator: OperatorContext,
    Path(charge_id): Path<Uuid>,
) -> Result<Json<RefundResponse>, AppError> {
    tracing::info!(
        charge_id = %charge_id,
        operator_id = %operator.operator_id,
        "Refund requested"
    );

    let outcome = state.orchestrator.refund_charge(charge_id).await?;
    Ok(Json(outcome.into()))
}
