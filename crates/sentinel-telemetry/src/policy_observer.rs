#![allow(clippy::module_name_repetitions)]

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

struct Instruments {
    rule_matches: Counter<u64>,
    pii_detections: Counter<u64>,
    fail_closed: Counter<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        let meter: Meter = global::meter("sentinel.policy");
        Instruments {
            rule_matches: meter
                .u64_counter("sentinel.policy.rule_match.count")
                .with_description("Policy rule match counter")
                .init(),
            pii_detections: meter
                .u64_counter("sentinel.policy.pii_detection.count")
                .with_description("PII detection counter by entity type")
                .init(),
            fail_closed: meter
                .u64_counter("sentinel.policy.fail_closed.count")
                .with_description("Requests evaluated with no policy loaded")
                .init(),
        }
    })
}

/// OTel-backed observer for policy evaluation events.
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelPolicyObserver;

impl sentinel_policy::PolicyObserver for OtelPolicyObserver {
    fn on_event(&self, event: &sentinel_policy::PolicyEvent) {
        let inst = ensure_instruments();
        match event {
            sentinel_policy::PolicyEvent::RuleMatched { rule_id } => {
                inst.rule_matches.add(1, &[KeyValue::new("rule_id", rule_id.clone())]);
            }
            sentinel_policy::PolicyEvent::PiiDetected { entity_type } => {
                inst.pii_detections.add(1, &[KeyValue::new("entity_type", entity_type.clone())]);
            }
            sentinel_policy::PolicyEvent::FailedClosed => {
                inst.fail_closed.add(1, &[]);
            }
        }
    }
}

/// Return an observer instance. Prefer a fresh value over a `'static` ref
/// for simplicity; the underlying instruments are still process-global.
#[must_use]
pub fn global() -> OtelPolicyObserver {
    let _ = ensure_instruments();
    OtelPolicyObserver
}
