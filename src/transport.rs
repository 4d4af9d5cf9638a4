//! Abstract async request/response driver.
//!
//! The engine depends on nothing but this trait; tests substitute fakes and
//! production embeds whatever in-process client the host app exposes.
//! Transport errors are data returned to the runner, never unwinding, and
//! never passed through validators.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::request::ApiRequest;
use crate::request::ApiResponse;

/// Failures at or below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("server unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("malformed response: {reason}")]
    Malformed { reason: String },
}

/// In-process async request/response driver.
///
/// `send` is the only suspension point in the engine. `reset` is invoked by
/// the stateful runner before each sequence execution so the target can
/// restore a known state; the default is a no-op for stateless targets.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;

    async fn reset(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        (**self).send(request).await
    }

    async fn reset(&self) -> Result<(), TransportError> {
        (**self).reset().await
    }
}
