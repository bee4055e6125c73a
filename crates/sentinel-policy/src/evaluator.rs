//! Risk Evaluator (component E): a pure function of a request, the current
//! rule snapshot, and the evaluation time. Kept free of any I/O or shared
//! mutable state so it is trivially testable and deterministic under
//! replay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::EvalTime;
use crate::store::PolicyRule;

/// One rule that matched, carried through to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub name: String,
    pub risk_score_modifier: f64,
}

/// The Risk Evaluator's output: not yet a final allow/deny/pending
/// verdict, only the evidence the Decision Engine needs to compute one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub risk_score: f64,
    /// Ordered by descending priority, then ascending `rule_id`.
    pub matched_rules: Vec<MatchedRule>,
    pub reason: Option<String>,
}

/// Sentinel value used when no policy has ever been loaded: the request
/// is evaluated as maximally risky so the fail-closed default in the
/// Decision Engine denies it rather than silently allowing everything.
pub const FAIL_CLOSED_RISK_SCORE: f64 = 1.0;

/// Evaluate a request's risk against a rule snapshot.
///
/// `policy_loaded` distinguishes "store has zero matching rules" (a risk
/// score of `0.0`, the ordinary no-match case) from "store has never had
/// a policy document loaded" (fail-closed: maximal risk score).
#[must_use]
pub fn evaluate(
    action_type: &str,
    target_resource: &str,
    parameters: &Value,
    rules: &[PolicyRule],
    time: EvalTime,
    policy_loaded: bool,
) -> EvaluationResult {
    if !policy_loaded {
        return EvaluationResult {
            risk_score: FAIL_CLOSED_RISK_SCORE,
            matched_rules: vec![],
            reason: Some("no policy loaded; failing closed".to_string()),
        };
    }

    let mut matches: Vec<&PolicyRule> = rules
        .iter()
        .filter(|r| r.applies_to(action_type))
        .filter(|r| r.conditions.iter().all(|c| c.matches(parameters, target_resource, time)))
        .collect();

    matches.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.rule_id.cmp(&b.rule_id)));

    let risk_score = matches.iter().map(|r| r.risk_score_modifier).sum();
    let reason = matches.first().map(|r| {
        r.description.clone().unwrap_or_else(|| r.name.clone())
    });
    let matched_rules = matches
        .into_iter()
        .map(|r| MatchedRule {
            rule_id: r.rule_id.clone(),
            name: r.name.clone(),
            risk_score_modifier: r.risk_score_modifier,
        })
        .collect();

    EvaluationResult { risk_score, matched_rules, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Weekday};
    use serde_json::json;

    fn rule(id: &str, priority: i32, modifier: f64, conditions: Vec<Condition>) -> PolicyRule {
        PolicyRule {
            rule_id: id.into(),
            name: format!("rule {id}"),
            description: None,
            action_types: vec![],
            conditions,
            risk_score_modifier: modifier,
            enabled: true,
            priority,
        }
    }

    fn noon() -> EvalTime {
        EvalTime { weekday: Weekday::Monday, hour: 12 }
    }

    #[test]
    fn fails_closed_when_policy_never_loaded() {
        let result = evaluate("transfer", "acct-1", &json!({}), &[], noon(), false);
        assert_eq!(result.risk_score, FAIL_CLOSED_RISK_SCORE);
        assert!(result.matched_rules.is_empty());
    }

    #[test]
    fn loaded_with_no_matches_is_zero_risk() {
        let rules = vec![rule("r1", 0, 0.5, vec![Condition::MaxAmount { value: 1_000_000.0 }])];
        let result = evaluate("transfer", "acct-1", &json!({"amount": 10}), &rules, noon(), true);
        assert_eq!(result.risk_score, 0.0);
    }

    #[test]
    fn sums_modifiers_across_matching_rules() {
        let rules = vec![
            rule("r1", 0, 0.3, vec![]),
            rule("r2", 0, 0.4, vec![]),
        ];
        let result = evaluate("transfer", "acct-1", &json!({}), &rules, noon(), true);
        assert!((result.risk_score - 0.7).abs() < f64::EPSILON);
        assert_eq!(result.matched_rules.len(), 2);
    }

    #[test]
    fn orders_matched_rules_by_priority_desc_then_id_asc() {
        let rules = vec![
            rule("b", 5, 0.1, vec![]),
            rule("a", 5, 0.1, vec![]),
            rule("z", 10, 0.1, vec![]),
        ];
        let result = evaluate("transfer", "acct-1", &json!({}), &rules, noon(), true);
        let ids: Vec<&str> = result.matched_rules.iter().map(|m| m.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn reason_comes_from_highest_priority_match() {
        let rules = vec![rule("low", 1, 0.1, vec![]), rule("high", 9, 0.2, vec![])];
        let result = evaluate("transfer", "acct-1", &json!({}), &rules, noon(), true);
        assert_eq!(result.reason, Some("rule high".to_string()));
    }

    #[test]
    fn disabled_rules_never_match() {
        let mut r = rule("r1", 0, 0.9, vec![]);
        r.enabled = false;
        let result = evaluate("transfer", "acct-1", &json!({}), &[r], noon(), true);
        assert_eq!(result.risk_score, 0.0);
    }

    #[test]
    fn action_type_scoping_excludes_unrelated_actions() {
        let mut r = rule("r1", 0, 0.5, vec![]);
        r.action_types = vec!["delete".to_string()];
        let result = evaluate("transfer", "acct-1", &json!({}), &[r], noon(), true);
        assert_eq!(result.risk_score, 0.0);
    }
}
