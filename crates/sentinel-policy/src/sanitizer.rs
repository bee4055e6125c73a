//! PII Sanitizer (component D): detects and masks personally identifying
//! fragments inside request parameters before they reach the risk
//! evaluator, the audit log, or any downstream target system.
//!
//! Detection runs before rule matching and before fail-closed is checked:
//! a caller must never have raw PII reflected back even when the gateway
//! has no policy loaded.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// How confident the detector was about a given finding. `Low` is used
/// when a scan degrades to its regex-only fallback subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

/// A single PII span found (and masked) inside request parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PiiFinding {
    pub entity_type: String,
    /// Dotted locator into `parameters`, e.g. `"customer.ssn"` or
    /// `"items.0.note"`.
    pub path: String,
    pub start: usize,
    pub end: usize,
    pub confidence: Confidence,
}

struct Detector {
    entity_type: &'static str,
    pattern: &'static Lazy<Regex>,
    validate: fn(&str) -> bool,
}

fn always_true(_: &str) -> bool {
    true
}

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w.+-]+@[A-Za-z0-9-]+\.[A-Za-z0-9.-]+\b").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\+1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b").unwrap());
static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\b").unwrap()
});
static CARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn full_detectors() -> Vec<Detector> {
    vec![
        Detector { entity_type: "SSN", pattern: &SSN_RE, validate: always_true },
        Detector { entity_type: "CREDIT_CARD", pattern: &CARD_RE, validate: luhn_valid },
        Detector { entity_type: "EMAIL", pattern: &EMAIL_RE, validate: always_true },
        Detector { entity_type: "PHONE", pattern: &PHONE_RE, validate: always_true },
        Detector { entity_type: "IP", pattern: &IP_RE, validate: always_true },
    ]
}

/// The reduced subset used when a scan exceeds its time budget: cheap,
/// anchor-only patterns with no secondary validation pass.
fn fast_detectors() -> Vec<Detector> {
    vec![
        Detector { entity_type: "SSN", pattern: &SSN_RE, validate: always_true },
        Detector { entity_type: "EMAIL", pattern: &EMAIL_RE, validate: always_true },
    ]
}

struct Candidate {
    entity_type: &'static str,
    start: usize,
    end: usize,
}

fn scan_str(value: &str, detectors: &[Detector]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for d in detectors {
        for m in d.pattern.find_iter(value) {
            if (d.validate)(m.as_str()) {
                candidates.push(Candidate { entity_type: d.entity_type, start: m.start(), end: m.end() });
            }
        }
    }
    // Longest match wins at a given start; resolve overlaps by scanning
    // left to right and skipping anything that overlaps an already
    // accepted span.
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then((b.end - b.start).cmp(&(a.end - a.start))));
    let mut accepted: Vec<Candidate> = Vec::new();
    let mut cursor = 0usize;
    for c in candidates {
        if c.start >= cursor {
            cursor = c.end;
            accepted.push(c);
        }
    }
    accepted
}

fn mask_str(value: &str, candidates: &[Candidate]) -> String {
    let mut out = value.to_string();
    for c in candidates.iter().rev() {
        out.replace_range(c.start..c.end, &format!("<{}>", c.entity_type));
    }
    out
}

fn walk(value: &Value, path: &str, detectors: &[Detector], confidence: Confidence, findings: &mut Vec<PiiFinding>) -> Value {
    match value {
        Value::String(s) => {
            let candidates = scan_str(s, detectors);
            if candidates.is_empty() {
                return value.clone();
            }
            for c in &candidates {
                findings.push(PiiFinding {
                    entity_type: c.entity_type.to_string(),
                    path: path.to_string(),
                    start: c.start,
                    end: c.end,
                    confidence,
                });
            }
            Value::String(mask_str(s, &candidates))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let child_path = if path.is_empty() { i.to_string() } else { format!("{path}.{i}") };
                    walk(item, &child_path, detectors, confidence, findings)
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                    (k.clone(), walk(v, &child_path, detectors, confidence, findings))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Scan and mask `parameters` using the full detector set. Returns the
/// redacted tree plus every finding, sorted by path then start.
#[must_use]
pub fn sanitize(parameters: &Value) -> (Value, Vec<PiiFinding>) {
    let detectors = full_detectors();
    let mut findings = Vec::new();
    let masked = walk(parameters, "", &detectors, Confidence::High, &mut findings);
    findings.sort_by(|a, b| a.path.cmp(&b.path).then(a.start.cmp(&b.start)));
    (masked, findings)
}

/// Scan with a wall-clock budget. Falls back to the fast detector subset
/// (and flags the resulting findings as [`Confidence::Low`]) if the full
/// scan does not complete within `budget`.
#[must_use]
pub fn sanitize_within(parameters: &Value, budget: Duration) -> (Value, Vec<PiiFinding>, bool) {
    let start = Instant::now();
    let detectors = full_detectors();
    let mut findings = Vec::new();
    let masked = walk(parameters, "", &detectors, Confidence::High, &mut findings);
    if start.elapsed() <= budget {
        findings.sort_by(|a, b| a.path.cmp(&b.path).then(a.start.cmp(&b.start)));
        return (masked, findings, false);
    }
    let mut fast_findings = Vec::new();
    let fast_masked = walk(parameters, "", &fast_detectors(), Confidence::Low, &mut fast_findings);
    fast_findings.sort_by(|a, b| a.path.cmp(&b.path).then(a.start.cmp(&b.start)));
    (fast_masked, fast_findings, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_ssn_in_place() {
        let (masked, findings) = sanitize(&json!({"note": "ssn is 123-45-6789 thanks"}));
        assert_eq!(masked["note"], "ssn is <SSN> thanks");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].entity_type, "SSN");
    }

    #[test]
    fn masks_email_nested_in_array() {
        let (masked, findings) = sanitize(&json!({"contacts": ["reach me at a@example.com"]}));
        assert_eq!(masked["contacts"][0], "reach me at <EMAIL>");
        assert_eq!(findings[0].path, "contacts.0");
    }

    #[test]
    fn credit_card_requires_luhn_validity() {
        let (masked, findings) = sanitize(&json!({"note": "card 4111111111111111 is valid"}));
        assert_eq!(masked["note"], "card <CREDIT_CARD> is valid");
        assert_eq!(findings[0].entity_type, "CREDIT_CARD");

        let (masked_bad, findings_bad) = sanitize(&json!({"note": "card 1234567890123456 is not"}));
        assert_eq!(masked_bad["note"], "card 1234567890123456 is not");
        assert!(findings_bad.is_empty());
    }

    #[test]
    fn longest_match_wins_on_overlap() {
        // An IPv4-shaped string should not also get spuriously split by
        // another detector matching a sub-span.
        let (masked, findings) = sanitize(&json!({"note": "origin 10.0.0.1 requested"}));
        assert_eq!(masked["note"], "origin <IP> requested");
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn non_string_leaves_pass_through_untouched() {
        let (masked, findings) = sanitize(&json!({"amount": 100, "active": true}));
        assert_eq!(masked, json!({"amount": 100, "active": true}));
        assert!(findings.is_empty());
    }

    #[test]
    fn degraded_scan_flags_low_confidence() {
        let (_masked, findings, degraded) =
            sanitize_within(&json!({"note": "123-45-6789"}), Duration::from_nanos(0));
        assert!(degraded);
        assert_eq!(findings[0].confidence, Confidence::Low);
    }
}
