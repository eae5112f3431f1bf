//! HTTP server for status, health, metrics and notification intake
//!
//! # Endpoints
//!
//! - `GET /status` - component snapshot (JSON)
//! - `GET /health` - 200 when every component runs, 503 otherwise
//! - `GET /metrics` - Prometheus metrics
//! - `POST /notify/:source` - submit a notification to a source
//!
//! # Example
//!
//! ```ignore
//! let handle = StatusServer::start("0.0.0.0:8081".parse()?, supervisor.handle());
//! ```

use crate::error::IngestError;
use crate::source::IncomingRequest;
use crate::supervisor::SupervisorHandle;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cygnet_core::{Headers, LifecycleState};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Status HTTP server
pub struct StatusServer;

impl StatusServer {
    /// Serve on `addr` until the returned task is aborted
    pub fn start(addr: SocketAddr, supervisor: SupervisorHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, addr = %addr, "Failed to bind status server");
                    return;
                }
            };
            info!(addr = %addr, "Status server listening");

            if let Err(e) = axum::serve(listener, router(supervisor)).await {
                error!(error = %e, "Status server error");
            }
        })
    }
}

/// Routes served by [`StatusServer`]
pub fn router(supervisor: SupervisorHandle) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/notify/:source", post(notify_handler))
        .with_state(supervisor)
}

async fn status_handler(State(supervisor): State<SupervisorHandle>) -> impl IntoResponse {
    Json(supervisor.snapshot())
}

#[derive(serde::Serialize)]
struct HealthSummary {
    status: &'static str,
    generation: u64,
    running: usize,
    failed: usize,
    total: usize,
}

async fn health_handler(State(supervisor): State<SupervisorHandle>) -> impl IntoResponse {
    let snapshot = supervisor.snapshot();
    let count = |state: LifecycleState| snapshot.components.iter().filter(|c| c.state == state).count();
    let running = count(LifecycleState::Running);
    let failed = count(LifecycleState::Failed);
    let total = snapshot.components.len();

    let status = if snapshot.shutting_down {
        "draining"
    } else if snapshot.generation == 0 {
        "starting"
    } else if running == total {
        "healthy"
    } else {
        "unhealthy"
    };
    let code = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthSummary {
            status,
            generation: snapshot.generation,
            running,
            failed,
            total,
        }),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        crate::metrics::gather(),
    )
}

async fn notify_handler(
    State(supervisor): State<SupervisorHandle>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let headers: Headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let request = IncomingRequest { headers, body };

    match supervisor.ingress().submit(&source, request).await {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(e) => (ingest_status(&e), e.to_string()),
    }
}

/// 4xx for requests that can never succeed, 5xx for ones worth redelivering
fn ingest_status(err: &IngestError) -> StatusCode {
    match err {
        IngestError::UnknownSource(_) => StatusCode::NOT_FOUND,
        IngestError::Decode(_) | IngestError::Protocol(_) => StatusCode::BAD_REQUEST,
        IngestError::Stopped(_) | IngestError::Channel(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ChannelConfig, PipelineConfiguration, SinkConfig, SourceConfig};
    use crate::registry::ComponentRegistry;
    use crate::supervisor::PipelineSupervisor;

    const ONE_ROOM: &str = r#"{"contextElements": [{"id": "r1", "type": "Room", "attributes": []}]}"#;

    async fn running() -> PipelineSupervisor {
        let sup = PipelineSupervisor::new(ComponentRegistry::with_builtin());
        sup.apply_configuration(
            PipelineConfiguration::new()
                .source("http", SourceConfig::new(["main"]))
                .channel("main", ChannelConfig::new(10))
                .sink("out", SinkConfig::new("main", BackendConfig::new("memory"))),
        )
        .await
        .unwrap();
        sup
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_lists_components() {
        let sup = running().await;
        let response = status_handler(State(sup.handle())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["generation"], 1);
        assert_eq!(json["components"].as_array().unwrap().len(), 3);
        assert_eq!(json["components"][0]["state"], "RUNNING");
        assert_eq!(json["components"][0]["kind"], "source");
    }

    #[tokio::test]
    async fn test_health_before_configuration() {
        let sup = PipelineSupervisor::new(ComponentRegistry::with_builtin());
        let response = health_handler(State(sup.handle())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "starting");
    }

    #[tokio::test]
    async fn test_health_when_running() {
        let sup = running().await;
        let response = health_handler(State(sup.handle())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["running"], 3);
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let _ = crate::metrics::Metrics::init();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_notify_accepts_and_rejects() {
        let sup = running().await;

        let mut headers = HeaderMap::new();
        headers.insert("Fiware-Service", "smartcity".parse().unwrap());
        let ok = notify_handler(
            State(sup.handle()),
            Path("http".to_string()),
            headers,
            Bytes::from_static(ONE_ROOM.as_bytes()),
        )
        .await
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);

        let bad = notify_handler(
            State(sup.handle()),
            Path("http".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"{"),
        )
        .await
        .into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let unknown = notify_handler(
            State(sup.handle()),
            Path("ftp".to_string()),
            HeaderMap::new(),
            Bytes::from_static(ONE_ROOM.as_bytes()),
        )
        .await
        .into_response();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
