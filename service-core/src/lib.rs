//! service-core: infrastructure shared across services.

pub mod error;
pub mod middleware;

pub use axum;
pub use tracing;
pub use validator;
