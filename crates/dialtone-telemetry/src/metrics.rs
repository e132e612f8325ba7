//! Prometheus-backed metrics registry and snapshot helpers.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across the service.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    device_ops_total: IntCounterVec,
    store_failures_total: IntCounter,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total count of storage failures surfaced to API callers.
    pub store_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let device_ops_total = IntCounterVec::new(
            Opts::new(
                "device_ops_total",
                "Device category operations by kind and outcome",
            ),
            &["op", "outcome"],
        )?;
        let store_failures_total = IntCounter::with_opts(Opts::new(
            "store_failures_total",
            "Database operations that failed and were surfaced as errors",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(device_ops_total.clone()))?;
        registry.register(Box::new(store_failures_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                device_ops_total,
                store_failures_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the device operation counter for an operation and outcome.
    pub fn inc_device_op(&self, op: &str, outcome: &str) {
        self.inner
            .device_ops_total
            .with_label_values(&[op, outcome])
            .inc();
    }

    /// Increment the storage failure counter.
    pub fn inc_store_failure(&self) {
        self.inner.store_failures_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the counters used in health output.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            store_failures_total: self.inner.store_failures_total.get(),
        }
    }
}
