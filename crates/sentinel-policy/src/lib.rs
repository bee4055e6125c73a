//! Policy Store (C), PII Sanitizer (D), and Risk Evaluator (E).
//!
//! These three components share one crate because they run back to back
//! on every request and the middle one (sanitization) must see its input
//! before the third (evaluation) does: PII redaction always runs first,
//! then rule matching, regardless of whether a policy is even loaded.

#![deny(unsafe_code)]

pub mod condition;
pub mod evaluator;
pub mod sanitizer;
pub mod store;

pub use condition::{Condition, EvalTime, Weekday};
pub use evaluator::{evaluate, EvaluationResult, MatchedRule};
pub use sanitizer::{sanitize, sanitize_within, Confidence, PiiFinding};
pub use store::{parse_rules_yaml, PolicyRule, PolicyStore, PolicyStoreError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

/// A notable thing that happened while evaluating a request, for a
/// telemetry layer to turn into counters and spans.
#[derive(Debug, Clone)]
pub enum PolicyEvent {
    RuleMatched { rule_id: String },
    PiiDetected { entity_type: String },
    FailedClosed,
}

/// Observer seam a telemetry crate hangs counters and spans off of.
pub trait PolicyObserver: Send + Sync {
    fn on_event(&self, event: &PolicyEvent);
}

/// The default observer: discards every event.
#[derive(Default)]
pub struct NoopObserver;

impl PolicyObserver for NoopObserver {
    fn on_event(&self, _event: &PolicyEvent) {}
}

/// In-process counters mirroring the events an observer would also see.
/// Kept alongside the observer seam so a caller that only wants counts
/// (no tracing spans) doesn't need to implement [`PolicyObserver`] itself.
#[derive(Default)]
pub struct PolicyMetrics {
    pii_by_entity_type: Mutex<HashMap<String, u64>>,
    rule_matches: Mutex<HashMap<String, u64>>,
    fail_closed_count: std::sync::atomic::AtomicU64,
}

impl PolicyMetrics {
    fn record(&self, event: &PolicyEvent) {
        match event {
            PolicyEvent::PiiDetected { entity_type } => {
                *self
                    .pii_by_entity_type
                    .lock()
                    .expect("metrics lock poisoned")
                    .entry(entity_type.clone())
                    .or_insert(0) += 1;
            }
            PolicyEvent::RuleMatched { rule_id } => {
                *self
                    .rule_matches
                    .lock()
                    .expect("metrics lock poisoned")
                    .entry(rule_id.clone())
                    .or_insert(0) += 1;
            }
            PolicyEvent::FailedClosed => {
                self.fail_closed_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn pii_count(&self, entity_type: &str) -> u64 {
        *self.pii_by_entity_type.lock().expect("metrics lock poisoned").get(entity_type).unwrap_or(&0)
    }

    #[must_use]
    pub fn rule_match_count(&self, rule_id: &str) -> u64 {
        *self.rule_matches.lock().expect("metrics lock poisoned").get(rule_id).unwrap_or(&0)
    }

    #[must_use]
    pub fn fail_closed_count(&self) -> u64 {
        self.fail_closed_count.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Result of running a request through sanitization and evaluation.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub masked_parameters: Value,
    pub pii_findings: Vec<PiiFinding>,
    pub evaluation: EvaluationResult,
    pub degraded_sanitization: bool,
}

/// Ties the Policy Store, PII Sanitizer, and Risk Evaluator into the one
/// pipeline stage the gateway calls per request.
pub struct PolicyEngine {
    pub store: PolicyStore,
    observer: Arc<dyn PolicyObserver>,
    pub metrics: Arc<PolicyMetrics>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(store: PolicyStore) -> Self {
        Self { store, observer: Arc::new(NoopObserver), metrics: Arc::new(PolicyMetrics::default()) }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PolicyObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn emit(&self, event: PolicyEvent) {
        self.metrics.record(&event);
        self.observer.on_event(&event);
    }

    /// Sanitize then evaluate a request, within a time budget for the
    /// sanitization pass (the more expensive of the two stages).
    pub fn process(
        &self,
        action_type: &str,
        target_resource: &str,
        parameters: &Value,
        now_ms: u64,
        sanitize_budget: Duration,
    ) -> EngineOutput {
        let (masked_parameters, pii_findings, degraded_sanitization) =
            sanitize_within(parameters, sanitize_budget);
        for f in &pii_findings {
            self.emit(PolicyEvent::PiiDetected { entity_type: f.entity_type.clone() });
        }

        let policy_loaded = self.store.is_loaded();
        if !policy_loaded {
            self.emit(PolicyEvent::FailedClosed);
        }

        let rules = self.store.list();
        let time = EvalTime::from_epoch_ms(now_ms);
        let evaluation = evaluate(action_type, target_resource, parameters, &rules, time, policy_loaded);
        for m in &evaluation.matched_rules {
            self.emit(PolicyEvent::RuleMatched { rule_id: m.rule_id.clone() });
        }

        EngineOutput { masked_parameters, pii_findings, evaluation, degraded_sanitization }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(id: &str, modifier: f64) -> PolicyRule {
        PolicyRule {
            rule_id: id.into(),
            name: "any amount".into(),
            description: None,
            action_types: vec![],
            conditions: vec![],
            risk_score_modifier: modifier,
            enabled: true,
            priority: 0,
        }
    }

    #[test]
    fn process_masks_independently_of_evaluating() {
        let engine = PolicyEngine::new(PolicyStore::new(vec![rule("r1", 0.2)]));
        let out = engine.process(
            "transfer",
            "acct-1",
            &json!({"note": "ssn 123-45-6789", "amount": 10}),
            1_700_000_000_000,
            Duration::from_millis(500),
        );
        assert_eq!(out.masked_parameters["note"], "ssn <SSN>");
        assert_eq!(out.pii_findings.len(), 1);
        assert!((out.evaluation.risk_score - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn process_fails_closed_with_no_policy_loaded() {
        let engine = PolicyEngine::new(PolicyStore::empty());
        let out = engine.process("transfer", "acct-1", &json!({}), 0, Duration::from_millis(500));
        assert_eq!(out.evaluation.risk_score, evaluator::FAIL_CLOSED_RISK_SCORE);
        assert_eq!(engine.metrics.fail_closed_count(), 1);
    }

    #[test]
    fn process_updates_metrics() {
        let engine = PolicyEngine::new(PolicyStore::new(vec![rule("big", 0.5)]));
        engine.process("transfer", "acct-1", &json!({"note": "a@example.com"}), 0, Duration::from_millis(500));
        assert_eq!(engine.metrics.pii_count("EMAIL"), 1);
        assert_eq!(engine.metrics.rule_match_count("big"), 1);
    }
}
