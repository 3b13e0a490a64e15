//! # Prometheus Metrics
//!
//! Exposes resync counters for the node. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Primary-store rows examined by resend requests.
    pub resend_rows_examined_total: IntCounter,
    /// Batches handed to the peer publisher.
    pub resend_batches_published_total: IntCounter,
    /// Payloads accepted into the staging area from peer pushes.
    pub push_payloads_staged_total: IntCounter,
    /// Staging passes run, manual or background.
    pub staging_passes_total: IntCounter,
    /// Staged versions committed without a privacy violation.
    pub sync_versions_committed_total: IntCounter,
    /// Staged versions rejected by the commit path.
    pub sync_privacy_violations_total: IntCounter,
    /// Rows currently in the staging area.
    pub staging_rows: IntGauge,
    /// Duration of a full background recovery pass.
    pub recovery_pass_duration_seconds: Histogram,
}

fn register<M>(registry: &Registry, metric: M) -> Result<M, prometheus::Error>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ptm".into()), None)?;

        let resend_rows_examined_total = register(
            &registry,
            IntCounter::new(
                "resend_rows_examined_total",
                "Primary store rows examined while answering resend requests",
            )?,
        )?;
        let resend_batches_published_total = register(
            &registry,
            IntCounter::new(
                "resend_batches_published_total",
                "Outbound resend batches handed to the publisher",
            )?,
        )?;
        let push_payloads_staged_total = register(
            &registry,
            IntCounter::new(
                "push_payloads_staged_total",
                "Pushed payloads written to the staging area",
            )?,
        )?;
        let staging_passes_total = register(
            &registry,
            IntCounter::new("staging_passes_total", "Staging passes run")?,
        )?;
        let sync_versions_committed_total = register(
            &registry,
            IntCounter::new(
                "sync_versions_committed_total",
                "Staged versions committed to the primary store",
            )?,
        )?;
        let sync_privacy_violations_total = register(
            &registry,
            IntCounter::new(
                "sync_privacy_violations_total",
                "Staged versions rejected for privacy violations",
            )?,
        )?;
        let staging_rows = register(
            &registry,
            IntGauge::new("staging_rows", "Rows currently in the staging area")?,
        )?;
        let recovery_pass_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "recovery_pass_duration_seconds",
                    "Duration of a staging, sync and cleanup pass in seconds",
                )
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            resend_rows_examined_total,
            resend_batches_published_total,
            push_payloads_staged_total,
            staging_passes_total,
            sync_versions_committed_total,
            sync_privacy_violations_total,
            staging_rows,
            recovery_pass_duration_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_uses_ptm_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.staging_passes_total.inc();
        metrics.staging_rows.set(7);

        let text = metrics.encode().unwrap();
        assert!(text.contains("ptm_staging_passes_total 1"));
        assert!(text.contains("ptm_staging_rows 7"));
        assert!(text.contains("ptm_resend_rows_examined_total 0"));
    }

    #[test]
    fn registries_are_independent() {
        let a = NodeMetrics::new().unwrap();
        let b = NodeMetrics::new().unwrap();
        a.sync_privacy_violations_total.inc_by(3);

        assert!(b
            .encode()
            .unwrap()
            .contains("ptm_sync_privacy_violations_total 0"));
    }
}
