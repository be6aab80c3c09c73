use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use service_core::error::AppError;

use crate::dtos::{CreateManualTransactionRequest, ManualTransactionResponse};
use crate::middleware::OperatorContext;
use crate::AppState;

/// `POST /charges/manual-transaction` — fold an out-of-band settled
/// transaction into the charge store.
pub async fn create_manual_transaction(
    State(state): State<AppState>,
    operator: OperatorContext,
    Json(payload): Json<CreateManualTransactionRequest>,
) -> Result<(StatusCode, Json<ManualTransactionResponse>), AppError> {
    payload.validate()?;

    let charge = state
        .importer
        .create_manual_transaction_charge(&operator.operator_id, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(charge.into())))
}
