//! Operator context extractor.
//!
//! Mutating endpoints require the identity of the operator acting on behalf
//! of the property. The `X-Operator-Id` header is set by the upstream auth
//! middleware after session validation; this service only trusts it, it does
//! not verify it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub operator_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for OperatorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let operator_id = parts
            .headers
            .get("X-Operator-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-Operator-Id header"))
            })?;

        tracing::Span::current().record("operator_id", operator_id);

        Ok(OperatorContext {
            operator_id: operator_id.to_string(),
        })
    }
}
