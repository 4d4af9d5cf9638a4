//! Test support: scripted in-process transports.
//!
//! These fakes keep engine tests deterministic without a network stack. A
//! [`FnTransport`] answers from a closure; a [`RecordingTransport`] wraps
//! another transport and captures every request it forwards.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::request::ApiRequest;
use crate::request::ApiResponse;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Transport answering from a plain function of the request.
pub struct FnTransport<F> {
    respond: F,
}

impl<F> FnTransport<F>
where
    F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync,
{
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        (self.respond)(request)
    }
}

/// Wrapper that records every forwarded request.
pub struct RecordingTransport<T> {
    inner: T,
    requests: Mutex<Vec<ApiRequest>>,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, requests: Mutex::new(Vec::new()) }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl<T: Transport> Transport for RecordingTransport<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        self.inner.send(request).await
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.inner.reset().await
    }
}

/// Stateful fake modelling a resource store: POST allocates sequential ids,
/// GET answers per a caller-supplied policy. `reset` clears allocations, so
/// shrink replays observe a clean target.
pub struct ResourceStoreTransport<G> {
    created: Mutex<Vec<i64>>,
    on_get: G,
}

impl<G> ResourceStoreTransport<G>
where
    G: Fn(i64, &[i64]) -> ApiResponse + Send + Sync,
{
    pub fn new(on_get: G) -> Self {
        Self { created: Mutex::new(Vec::new()), on_get }
    }
}

#[async_trait]
impl<G> Transport for ResourceStoreTransport<G>
where
    G: Fn(i64, &[i64]) -> ApiResponse + Send + Sync,
{
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        if request.method == "POST" {
            let id = created.len() as i64 + 1;
            created.push(id);
            return Ok(ApiResponse::new(201).with_json(&serde_json::json!({ "id": id })));
        }
        let id: i64 = request
            .path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse().ok())
            .ok_or_else(|| TransportError::Malformed {
                reason: format!("non-numeric id in path '{}'", request.path),
            })?;
        Ok((self.on_get)(id, &created))
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

