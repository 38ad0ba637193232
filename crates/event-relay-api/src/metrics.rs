//! Prometheus metrics for the API service.
//!
//! Metrics live on a registry owned by [`ServiceMetrics`] rather than the
//! process-global default, so every router built in tests gets its own set.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "event_relay";

/// Webhook results, one label value per outcome the intake can produce.
pub mod webhook_result {
    pub const ACCEPTED: &str = "accepted";
    pub const DEDUPLICATED: &str = "deduplicated";
    pub const LIFECYCLE: &str = "lifecycle";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID: &str = "invalid";
    pub const FORBIDDEN: &str = "forbidden";
    pub const ERROR: &str = "error";
}

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // Webhook intake metrics
    pub webhook_requests_total: IntCounterVec,

    // Dispatch metrics
    pub manual_retries_total: IntCounterVec,
    pub dispatch_backlog: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["method", "path"],
        )?;
        let webhook_requests_total = IntCounterVec::new(
            Opts::new("webhook_requests_total", "Webhook requests by result"),
            &["result"],
        )?;
        let manual_retries_total = IntCounterVec::new(
            Opts::new("manual_retries_total", "Manual retries by dispatch outcome"),
            &["outcome"],
        )?;
        let dispatch_backlog = IntGauge::new(
            "dispatch_backlog",
            "Dispatch jobs waiting for a worker",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(manual_retries_total.clone()))?;
        registry.register(Box::new(dispatch_backlog.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            webhook_requests_total,
            manual_retries_total,
            dispatch_backlog,
        }))
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    pub fn record_webhook(&self, result: &str) {
        self.webhook_requests_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_manual_retry(&self, outcome: &str) {
        self.manual_retries_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_dispatch_backlog(&self, backlog: usize) {
        self.dispatch_backlog
            .set(i64::try_from(backlog).unwrap_or(i64::MAX));
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
