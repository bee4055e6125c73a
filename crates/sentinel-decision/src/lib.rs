//! Decision Engine (component G): maps `(risk_score, mode)` to
//! `{allow, deny, pending}` against configurable thresholds.

#![deny(unsafe_code)]

use sentinel_mode::Mode;
use serde::{Deserialize, Serialize};

/// Threshold configuration. Defaults match the distilled spec:
/// `approval_threshold = 0.8`, `block_threshold = 1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Risk score at or above which a decision becomes `PENDING`.
    pub approval_threshold: f64,
    /// Risk score at or above which a decision becomes `DENY`.
    pub block_threshold: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self { approval_threshold: 0.8, block_threshold: 1.0 }
    }
}

/// The true (pre-mode-rewrite) verdict for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No matching rule pushed the risk score past either threshold.
    Allow,
    /// Risk score fell in `[approval_threshold, block_threshold)`.
    Pending,
    /// Risk score met or exceeded `block_threshold`.
    Deny,
}

/// Coarse risk bucket surfaced in the evaluate response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// `risk_score < 0.3`.
    Low,
    /// `0.3 <= risk_score < 0.8`.
    Medium,
    /// `risk_score >= 0.8`.
    High,
}

/// The final outcome after applying the circuit breaker's mode rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmittedDecision {
    /// Response the caller receives, possibly rewritten by OBSERVE mode.
    Allow,
    /// Response the caller receives. Only reachable in ENFORCE mode.
    Deny,
    /// Response the caller receives. Only reachable in ENFORCE mode.
    Pending,
}

/// The fully resolved decision: the emitted (caller-facing) outcome plus
/// the true verdict the pipeline computed and audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// What the caller is told.
    pub emitted: EmittedDecision,
    /// What actually happened, for audit and for OBSERVE-mode transparency.
    pub true_verdict: Verdict,
    /// The mode in effect when this decision was made.
    pub mode_in_effect: Mode,
}

impl Decision {
    /// `observed_decision` to attach to the response: present only when
    /// OBSERVE mode rewrote a non-allow verdict.
    #[must_use]
    pub fn observed_decision(&self) -> Option<Verdict> {
        if self.mode_in_effect == Mode::Observe && self.true_verdict != Verdict::Allow {
            Some(self.true_verdict)
        } else {
            None
        }
    }

    /// HTTP status an out-of-scope transport layer would use for this
    /// decision's emitted outcome.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.emitted {
            EmittedDecision::Allow => 200,
            EmittedDecision::Deny => 403,
            EmittedDecision::Pending => 202,
        }
    }
}

/// Derive the coarse risk bucket from a risk score, per the distilled
/// spec's `<0.3 low, <0.8 medium, else high` rule.
#[must_use]
pub fn risk_level(risk_score: f64) -> RiskLevel {
    if risk_score < 0.3 {
        RiskLevel::Low
    } else if risk_score < 0.8 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Pure decision function: `(risk_score, mode, thresholds) -> Decision`.
#[must_use]
pub fn decide(risk_score: f64, mode: Mode, thresholds: DecisionThresholds) -> Decision {
    let true_verdict = if risk_score >= thresholds.block_threshold {
        Verdict::Deny
    } else if risk_score >= thresholds.approval_threshold {
        Verdict::Pending
    } else {
        Verdict::Allow
    };

    let emitted = match mode {
        Mode::Observe => EmittedDecision::Allow,
        Mode::Enforce => match true_verdict {
            Verdict::Allow => EmittedDecision::Allow,
            Verdict::Deny => EmittedDecision::Deny,
            Verdict::Pending => EmittedDecision::Pending,
        },
    };

    Decision { emitted, true_verdict, mode_in_effect: mode }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> DecisionThresholds {
        DecisionThresholds::default()
    }

    #[test]
    fn boundary_equals_approval_threshold_is_pending() {
        let d = decide(0.8, Mode::Enforce, thresholds());
        assert_eq!(d.true_verdict, Verdict::Pending);
    }

    #[test]
    fn boundary_equals_block_threshold_is_deny() {
        let d = decide(1.0, Mode::Enforce, thresholds());
        assert_eq!(d.true_verdict, Verdict::Deny);
    }

    #[test]
    fn below_approval_threshold_is_allow() {
        let d = decide(0.1, Mode::Enforce, thresholds());
        assert_eq!(d.true_verdict, Verdict::Allow);
    }

    #[test]
    fn observe_mode_never_emits_deny_or_pending() {
        for score in [0.0, 0.5, 0.8, 0.99, 1.0, 5.0] {
            let d = decide(score, Mode::Observe, thresholds());
            assert_eq!(d.emitted, EmittedDecision::Allow);
            assert_eq!(d.http_status(), 200);
        }
    }

    #[test]
    fn observe_mode_surfaces_true_verdict_via_observed_decision() {
        let d = decide(1.0, Mode::Observe, thresholds());
        assert_eq!(d.observed_decision(), Some(Verdict::Deny));
    }

    #[test]
    fn enforce_mode_observed_decision_is_none() {
        let d = decide(1.0, Mode::Enforce, thresholds());
        assert_eq!(d.observed_decision(), None);
    }

    #[test]
    fn risk_level_buckets() {
        assert_eq!(risk_level(0.1), RiskLevel::Low);
        assert_eq!(risk_level(0.3), RiskLevel::Medium);
        assert_eq!(risk_level(0.79), RiskLevel::Medium);
        assert_eq!(risk_level(0.8), RiskLevel::High);
    }
}
