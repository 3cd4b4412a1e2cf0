// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Health check endpoints.
//!
//! `/healthz` answers as long as the process serves requests, `/healthz/ready`
//! runs every registered check, and `/healthz/deep` returns the per-check
//! detail as JSON.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::runtime_state::RuntimeState;

/// Boxed future for health checks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Combined outcome of all checks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckResult>,
}

/// A named readiness check.
pub trait HealthChecker: Send + Sync + 'static {
    /// Returns `Err` with a reason when unhealthy.
    fn check(&self) -> BoxFuture<'_, Result<(), String>>;

    fn name(&self) -> &str;
}

/// Adapter for implementing [`HealthChecker`] with a closure.
pub struct FunctionHealthChecker<F> {
    name: String,
    check_fn: F,
}

impl<F, Fut> FunctionHealthChecker<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, check_fn: F) -> Self {
        Self {
            name: name.into(),
            check_fn,
        }
    }
}

impl<F, Fut> HealthChecker for FunctionHealthChecker<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin((self.check_fn)())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Healthy while the runtime state reports no errors.
pub struct RuntimeStateChecker {
    state: Arc<RuntimeState>,
}

impl RuntimeStateChecker {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }
}

impl HealthChecker for RuntimeStateChecker {
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            let errors = self.state.errors();
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join(","))
            }
        })
    }

    fn name(&self) -> &str {
        "runtime"
    }
}

#[derive(Clone, Default)]
pub struct HealthRegistry {
    checkers: Arc<RwLock<Vec<Arc<dyn HealthChecker>>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, checker: Arc<dyn HealthChecker>) {
        self.checkers.write().await.push(checker);
    }

    /// Runs all checks.
    pub async fn check_all(&self) -> HealthCheck {
        let checkers = self.checkers.read().await;
        let mut checks = BTreeMap::new();
        let mut healthy = true;

        for checker in checkers.iter() {
            let result = match checker.check().await {
                Ok(()) => CheckResult {
                    status: HealthStatus::Healthy,
                    message: None,
                },
                Err(message) => {
                    healthy = false;
                    CheckResult {
                        status: HealthStatus::Unhealthy,
                        message: Some(message),
                    }
                }
            };
            checks.insert(checker.name().to_string(), result);
        }

        HealthCheck {
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            checks,
        }
    }

    pub async fn len(&self) -> usize {
        self.checkers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkers.read().await.is_empty()
    }
}

/// Serves the health endpoints over HTTP/1.
pub struct HealthServer {
    registry: HealthRegistry,
    bind_address: SocketAddr,
}

impl HealthServer {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            registry: HealthRegistry::new(),
            bind_address,
        }
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    /// Serves until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_address).await?;
        tracing::info!(address = %self.bind_address, "health server listening");

        loop {
            let (stream, _) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            let registry = self.registry.clone();
            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let registry = registry.clone();
                    async move { Ok::<_, hyper::Error>(route(req.uri().path(), &registry).await) }
                });
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    tracing::debug!(error = %e, "health connection closed");
                }
            });
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn status_code(check: &HealthCheck) -> StatusCode {
    match check.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn route(path: &str, registry: &HealthRegistry) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/healthz/live" => respond(StatusCode::OK, "text/plain", "ok"),
        "/healthz/ready" => {
            let result = registry.check_all().await;
            let body = match result.status {
                HealthStatus::Healthy => "ok",
                HealthStatus::Unhealthy => "not ready",
            };
            respond(status_code(&result), "text/plain", body)
        }
        "/healthz/deep" => {
            let result = registry.check_all().await;
            let json = serde_json::to_string(&result).unwrap_or_default();
            respond(status_code(&result), "application/json", json)
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}
