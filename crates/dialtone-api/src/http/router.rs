//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, Method, Request, header::CONTENT_TYPE},
    routing::get,
};
use dialtone_data::DeviceStore;
use dialtone_telemetry::{Metrics, build_sha, propagate_request_id_layer, set_request_id_layer};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Span;

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::HEADER_REQUEST_ID;
use crate::http::devices::{
    create_device, delete_device, device_by_metric, list_devices, merge_device,
};
use crate::http::health::{api_root, health, metrics};
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;
use crate::store::SharedStore;

// Upper bound on request handling time, database work included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Axum router wrapper that hosts the dialtone API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct a new API server over the concrete device store.
    #[must_use]
    pub fn new(store: DeviceStore, telemetry: Metrics) -> Self {
        Self::with_store(Arc::new(store), telemetry)
    }

    /// Construct the server over any store implementation.
    #[must_use]
    pub fn with_store(store: SharedStore, telemetry: Metrics) -> Self {
        let state = Arc::new(ApiState::new(store, telemetry.clone()));

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                CONTENT_TYPE,
                HeaderName::from_static(HEADER_REQUEST_ID),
            ]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let method = request.method().clone();
                let uri_path = request.uri().path();
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                tracing::info_span!(
                    "http.request",
                    method = %method,
                    route = %uri_path,
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

        let router = Router::new()
            .route("/api", get(api_root))
            .route(
                "/api/devices",
                get(list_devices)
                    .post(create_device)
                    .put(merge_device)
                    .delete(delete_device),
            )
            .route("/api/devices/{cat_metric}", get(device_by_metric))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Serve the API using the configured router on the supplied address.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(self, addr: SocketAddr) -> ApiServerResult<()> {
        tracing::info!("Starting API on {}", addr);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        axum::serve(listener, self.router.into_make_service())
            .await
            .map_err(|source| ApiServerError::Serve { source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeviceFacade;
    use async_trait::async_trait;
    use dialtone_data::{
        CreateOutcome, DataResult, DeleteOutcome, DeviceSummaryRow, DeviceVariableRow,
        MergeOutcome,
    };

    struct NullStore;

    #[async_trait]
    impl DeviceFacade for NullStore {
        async fn list_devices(&self) -> DataResult<Vec<DeviceSummaryRow>> {
            Ok(Vec::new())
        }

        async fn device_by_metric(&self, _cat_metric: i32) -> DataResult<Vec<DeviceVariableRow>> {
            Ok(Vec::new())
        }

        async fn create_device(
            &self,
            _category: &str,
            _variables: &[(String, String)],
        ) -> DataResult<CreateOutcome> {
            Ok(CreateOutcome::AlreadyExists)
        }

        async fn merge_device(
            &self,
            _category: &str,
            _variables: &[(String, String)],
        ) -> DataResult<MergeOutcome> {
            Ok(MergeOutcome::NotFound)
        }

        async fn delete_device(&self, _category: &str) -> DataResult<DeleteOutcome> {
            Ok(DeleteOutcome::NotFound)
        }

        async fn ping(&self) -> DataResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn router_builds_without_route_conflicts() {
        let telemetry = Metrics::new().expect("metrics registry");
        let _server = ApiServer::with_store(Arc::new(NullStore), telemetry);
    }
}
