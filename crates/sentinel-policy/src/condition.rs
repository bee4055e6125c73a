//! Tagged rule conditions.
//!
//! Rules used to carry a single freeform `when: String` field walked by a
//! dictionary interpreter at evaluation time; an unrecognized key silently
//! failed to match instead of rejecting the rule. Conditions are now a
//! closed, tagged vocabulary parsed once when a rule is loaded, so a typo
//! or an unsupported key is a load-time error rather than a silent no-op.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Day of week, independent of any calendar library: derived from a Unix
/// millisecond timestamp by integer arithmetic in [`EvalTime::from_epoch_ms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    fn from_index(idx: u64) -> Self {
        match idx % 7 {
            0 => Self::Monday,
            1 => Self::Tuesday,
            2 => Self::Wednesday,
            3 => Self::Thursday,
            4 => Self::Friday,
            5 => Self::Saturday,
            _ => Self::Sunday,
        }
    }
}

/// The point in time a rule set is evaluated against, derived once per
/// evaluation so every `BlockedDays`/`BlockedHours` condition in the same
/// pass agrees on "now".
#[derive(Debug, Clone, Copy)]
pub struct EvalTime {
    pub weekday: Weekday,
    pub hour: u8,
}

impl EvalTime {
    /// Derive weekday and UTC hour-of-day from a Unix millisecond
    /// timestamp. 1970-01-01 was a Thursday, which anchors the index.
    #[must_use]
    pub fn from_epoch_ms(now_ms: u64) -> Self {
        const DAY_MS: u64 = 86_400_000;
        const EPOCH_WEEKDAY_INDEX: u64 = 3; // Thursday
        let days = now_ms / DAY_MS;
        let ms_of_day = now_ms % DAY_MS;
        let hour = (ms_of_day / 3_600_000) as u8;
        let weekday = Weekday::from_index(days + EPOCH_WEEKDAY_INDEX);
        Self { weekday, hour }
    }
}

/// A single tagged condition. All variants are conjunctive within a rule:
/// the rule matches only when every one of its conditions matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Matches when `parameters.amount` (if present and numeric) is greater
    /// than the given value.
    MaxAmount { value: f64 },
    /// Matches when `parameters.amount` (if present and numeric) is less
    /// than the given value.
    MinAmount { value: f64 },
    /// Matches when `target_resource` is one of the listed resources.
    ProtectedResources { values: Vec<String> },
    /// Matches when `parameters.table` (if present) is one of the listed
    /// table names.
    ProtectedTables { values: Vec<String> },
    /// Matches when `parameters.affected_rows` (if present and numeric) is
    /// greater than the given value.
    MaxAffectedRows { value: u64 },
    /// Matches when every listed field is absent from `parameters`.
    RequiresFields { fields: Vec<String> },
    /// Matches when the evaluation time's weekday is in the given set.
    BlockedDays { days: HashSet<Weekday> },
    /// Matches when the evaluation time's hour falls in `[start, end)`,
    /// wrapping past midnight when `end <= start`.
    BlockedHours { start: u8, end: u8 },
}

impl Condition {
    /// Parse a single condition from its YAML/JSON tagged representation.
    ///
    /// # Errors
    /// Returns the offending document fragment's error message when the
    /// `kind` tag is unknown or a field is the wrong shape.
    pub fn parse(raw: serde_yaml::Value) -> Result<Self, String> {
        serde_yaml::from_value(raw).map_err(|e| e.to_string())
    }

    #[must_use]
    pub fn matches(&self, parameters: &Value, target_resource: &str, time: EvalTime) -> bool {
        match self {
            Self::MaxAmount { value } => {
                amount_field(parameters, "amount").is_some_and(|a| a > *value)
            }
            Self::MinAmount { value } => {
                amount_field(parameters, "amount").is_some_and(|a| a < *value)
            }
            Self::ProtectedResources { values } => {
                values.iter().any(|v| v == target_resource)
            }
            Self::ProtectedTables { values } => parameters
                .get("table")
                .and_then(Value::as_str)
                .is_some_and(|t| values.iter().any(|v| v == t)),
            Self::MaxAffectedRows { value } => {
                amount_field(parameters, "affected_rows").is_some_and(|a| a > *value as f64)
            }
            Self::RequiresFields { fields } => {
                fields.iter().all(|f| parameters.get(f).is_none())
            }
            Self::BlockedDays { days } => days.contains(&time.weekday),
            Self::BlockedHours { start, end } => {
                if start <= end {
                    time.hour >= *start && time.hour < *end
                } else {
                    time.hour >= *start || time.hour < *end
                }
            }
        }
    }
}

fn amount_field(parameters: &Value, key: &str) -> Option<f64> {
    parameters.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn max_amount_matches_strictly_greater() {
        let c = Condition::MaxAmount { value: 100.0 };
        assert!(c.matches(&json!({"amount": 150}), "res", EvalTime { weekday: Weekday::Monday, hour: 0 }));
        assert!(!c.matches(&json!({"amount": 100}), "res", EvalTime { weekday: Weekday::Monday, hour: 0 }));
    }

    #[test]
    fn protected_resources_matches_target() {
        let c = Condition::ProtectedResources { values: vec!["prod-db".into()] };
        assert!(c.matches(&json!({}), "prod-db", EvalTime { weekday: Weekday::Monday, hour: 0 }));
        assert!(!c.matches(&json!({}), "staging-db", EvalTime { weekday: Weekday::Monday, hour: 0 }));
    }

    #[test]
    fn requires_fields_matches_when_all_absent() {
        let c = Condition::RequiresFields { fields: vec!["justification".into()] };
        assert!(c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Monday, hour: 0 }));
        assert!(!c.matches(&json!({"justification": "x"}), "res", EvalTime { weekday: Weekday::Monday, hour: 0 }));
    }

    #[test]
    fn blocked_hours_wraps_past_midnight() {
        let c = Condition::BlockedHours { start: 22, end: 6 };
        assert!(c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Monday, hour: 23 }));
        assert!(c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Monday, hour: 3 }));
        assert!(!c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Monday, hour: 12 }));
    }

    #[test]
    fn blocked_days_matches_set_membership() {
        let mut days = HashSet::new();
        days.insert(Weekday::Saturday);
        days.insert(Weekday::Sunday);
        let c = Condition::BlockedDays { days };
        assert!(c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Saturday, hour: 0 }));
        assert!(!c.matches(&json!({}), "res", EvalTime { weekday: Weekday::Tuesday, hour: 0 }));
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let raw: serde_yaml::Value = serde_yaml::from_str("kind: not_a_real_condition\n").unwrap();
        assert!(Condition::parse(raw).is_err());
    }

    #[test]
    fn epoch_time_derivation_matches_known_thursday() {
        let t = EvalTime::from_epoch_ms(0);
        assert_eq!(t.weekday, Weekday::Thursday);
        assert_eq!(t.hour, 0);
    }
}
