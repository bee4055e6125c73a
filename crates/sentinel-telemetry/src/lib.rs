//! Structured logging and the metrics surface named in the gateway's
//! configuration contract: request/latency/risk-score/PII/policy/approval
//! counters, gauges, and histograms.

#![deny(unsafe_code)]

#[cfg(feature = "otel")]
pub mod policy_observer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured logging (JSON) with env filter.
/// Set `RUST_LOG`, e.g. `"info,sentinel_gateway=debug"`.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize an OpenTelemetry tracer (behind the `otel` feature). Does
/// not attach the tracer to the `tracing` subscriber; callers that want
/// traces exported wire that up separately.
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

/// A simple running-sum stat for a histogram-shaped measurement, used
/// where pulling in an OTel pipeline just to compute count/sum/max would
/// be overkill for a default, no-exporter deployment.
#[derive(Default)]
struct RunningStat {
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl RunningStat {
    fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.count.load(Ordering::Relaxed),
            self.sum.load(Ordering::Relaxed),
            self.max.load(Ordering::Relaxed),
        )
    }
}

/// Process-local metrics surface: request/decision counters, latency and
/// risk-score histograms, PII detection counters, and the two gauges
/// (active policy rule count, pending approval count).
#[derive(Default)]
pub struct GatewayMetrics {
    requests_by_decision: Mutex<HashMap<String, u64>>,
    pii_by_entity_type: Mutex<HashMap<String, u64>>,
    latency_ms: RunningStat,
    risk_score_millis: RunningStat,
    active_policy_rules: AtomicU64,
    pending_approvals: AtomicU64,
    fail_closed_count: AtomicU64,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one evaluated request, keyed by `{agent_id}:{action_type}:{decision}`.
    pub fn record_request(&self, agent_id: &str, action_type: &str, decision: &str) {
        let key = format!("{agent_id}:{action_type}:{decision}");
        *self.requests_by_decision.lock().expect("metrics lock poisoned").entry(key).or_insert(0) += 1;
    }

    #[must_use]
    pub fn request_count(&self, agent_id: &str, action_type: &str, decision: &str) -> u64 {
        let key = format!("{agent_id}:{action_type}:{decision}");
        *self.requests_by_decision.lock().expect("metrics lock poisoned").get(&key).unwrap_or(&0)
    }

    pub fn record_latency_ms(&self, ms: u64) {
        self.latency_ms.record(ms);
    }

    #[must_use]
    pub fn latency_snapshot(&self) -> (u64, u64, u64) {
        self.latency_ms.snapshot()
    }

    /// `score` is expected in `[0.0, f64::MAX)`; stored as milli-units so
    /// the running stat stays integer-only like the latency histogram.
    pub fn record_risk_score(&self, score: f64) {
        self.risk_score_millis.record((score * 1000.0).round() as u64);
    }

    #[must_use]
    pub fn risk_score_snapshot(&self) -> (u64, u64, u64) {
        self.risk_score_millis.snapshot()
    }

    pub fn record_pii(&self, entity_type: &str) {
        *self.pii_by_entity_type.lock().expect("metrics lock poisoned").entry(entity_type.to_string()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn pii_count(&self, entity_type: &str) -> u64 {
        *self.pii_by_entity_type.lock().expect("metrics lock poisoned").get(entity_type).unwrap_or(&0)
    }

    pub fn record_fail_closed(&self) {
        self.fail_closed_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn fail_closed_count(&self) -> u64 {
        self.fail_closed_count.load(Ordering::Relaxed)
    }

    pub fn set_active_policy_rules(&self, count: u64) {
        self.active_policy_rules.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active_policy_rules(&self) -> u64 {
        self.active_policy_rules.load(Ordering::Relaxed)
    }

    pub fn set_pending_approvals(&self, count: u64) {
        self.pending_approvals.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn pending_approvals(&self) -> u64 {
        self.pending_approvals.load(Ordering::Relaxed)
    }
}

/// Bridges [`sentinel_policy::PolicyObserver`] events into [`GatewayMetrics`]
/// and `tracing` spans, without requiring an OTel pipeline.
#[cfg(feature = "sentinel-policy")]
pub struct MetricsPolicyObserver {
    metrics: std::sync::Arc<GatewayMetrics>,
}

#[cfg(feature = "sentinel-policy")]
impl MetricsPolicyObserver {
    #[must_use]
    pub fn new(metrics: std::sync::Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }
}

#[cfg(feature = "sentinel-policy")]
impl sentinel_policy::PolicyObserver for MetricsPolicyObserver {
    fn on_event(&self, event: &sentinel_policy::PolicyEvent) {
        match event {
            sentinel_policy::PolicyEvent::PiiDetected { entity_type } => {
                self.metrics.record_pii(entity_type);
            }
            sentinel_policy::PolicyEvent::RuleMatched { rule_id } => {
                tracing::debug!(rule_id, "policy rule matched");
            }
            sentinel_policy::PolicyEvent::FailedClosed => {
                self.metrics.record_fail_closed();
                tracing::warn!("policy evaluation failed closed: no policy loaded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counter_is_keyed_by_agent_action_decision() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("agent-1", "transfer", "allow");
        metrics.record_request("agent-1", "transfer", "allow");
        metrics.record_request("agent-1", "transfer", "deny");
        assert_eq!(metrics.request_count("agent-1", "transfer", "allow"), 2);
        assert_eq!(metrics.request_count("agent-1", "transfer", "deny"), 1);
    }

    #[test]
    fn latency_histogram_tracks_count_sum_and_max() {
        let metrics = GatewayMetrics::new();
        metrics.record_latency_ms(10);
        metrics.record_latency_ms(30);
        let (count, sum, max) = metrics.latency_snapshot();
        assert_eq!(count, 2);
        assert_eq!(sum, 40);
        assert_eq!(max, 30);
    }

    #[test]
    fn gauges_reflect_last_set_value() {
        let metrics = GatewayMetrics::new();
        metrics.set_active_policy_rules(5);
        metrics.set_pending_approvals(2);
        assert_eq!(metrics.active_policy_rules(), 5);
        assert_eq!(metrics.pending_approvals(), 2);
        metrics.set_pending_approvals(3);
        assert_eq!(metrics.pending_approvals(), 3);
    }

    #[test]
    fn pii_counter_is_keyed_by_entity_type() {
        let metrics = GatewayMetrics::new();
        metrics.record_pii("SSN");
        metrics.record_pii("SSN");
        metrics.record_pii("EMAIL");
        assert_eq!(metrics.pii_count("SSN"), 2);
        assert_eq!(metrics.pii_count("EMAIL"), 1);
    }
}
