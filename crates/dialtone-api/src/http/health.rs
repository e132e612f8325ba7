//! Health and diagnostics endpoints.

use std::sync::Arc;

use axum::{Json, body::Body, extract::State, http::StatusCode, response::Response};
use dialtone_telemetry::{MetricsSnapshot, build_sha};
use serde::Serialize;
use tracing::{error, warn};

use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub(crate) struct HealthComponent {
    pub(crate) status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) build: String,
    pub(crate) degraded: Vec<String>,
    pub(crate) database: HealthComponent,
    pub(crate) metrics: MetricsSnapshot,
}

pub(crate) async fn api_root() -> &'static str {
    "dialtone Asterisk device API"
}

pub(crate) async fn health(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    match state.store.ping().await {
        Ok(()) => {
            state.remove_degraded_component("database");
            let degraded = state.current_health_degraded();
            let status = if degraded.is_empty() {
                "ok"
            } else {
                "degraded"
            };
            Ok(Json(HealthResponse {
                status,
                build: build_sha().to_string(),
                degraded,
                database: HealthComponent { status: "ok" },
                metrics: state.telemetry.snapshot(),
            }))
        }
        Err(err) => {
            state.add_degraded_component("database");
            warn!(error = %err, "health check failed to reach database");
            Err(ApiError::service_unavailable(
                "database is currently unavailable",
            ))
        }
    }
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    match state.telemetry.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )
            .body(Body::from(body))
            .map_err(|err| {
                error!(error = %err, "failed to build metrics response");
                ApiError::internal("failed to build metrics response")
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Err(ApiError::internal("failed to render metrics"))
        }
    }
}
