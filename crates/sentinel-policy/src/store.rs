//! Policy Store (component C): an in-memory, versioned rule set with
//! copy-on-write snapshots and change notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// A loaded, ready-to-evaluate policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Action types this rule applies to. Empty means "any action".
    #[serde(default)]
    pub action_types: Vec<String>,
    pub conditions: Vec<Condition>,
    /// Added to the running risk score when every condition matches.
    pub risk_score_modifier: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

impl PolicyRule {
    #[must_use]
    pub fn applies_to(&self, action_type: &str) -> bool {
        self.enabled && (self.action_types.is_empty() || self.action_types.iter().any(|a| a == action_type))
    }
}

/// The on-disk / wire representation of a rule before its conditions are
/// parsed out of their tagged YAML mapping form.
#[derive(Debug, Deserialize)]
struct RawRule {
    rule_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    action_types: Vec<String>,
    #[serde(default)]
    conditions: Vec<serde_yaml::Value>,
    risk_score_modifier: f64,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<RawRule>,
}

/// Errors the store's mutating operations can return.
#[derive(Debug, thiserror::Error)]
pub enum PolicyStoreError {
    #[error("rule {0} already exists")]
    DuplicateRuleId(String),
    #[error("rule {0} not found")]
    NotFound(String),
    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },
    #[error("malformed policy document: {0}")]
    Parse(String),
}

fn parse_raw_rule(raw: RawRule) -> Result<PolicyRule, PolicyStoreError> {
    if raw.rule_id.trim().is_empty() {
        return Err(PolicyStoreError::InvalidRule {
            rule_id: raw.rule_id,
            reason: "rule_id must not be empty".into(),
        });
    }
    if raw.risk_score_modifier < 0.0 {
        return Err(PolicyStoreError::InvalidRule {
            rule_id: raw.rule_id,
            reason: "risk_score_modifier must be non-negative".into(),
        });
    }
    let mut conditions = Vec::with_capacity(raw.conditions.len());
    for c in raw.conditions {
        let parsed = Condition::parse(c).map_err(|reason| PolicyStoreError::InvalidRule {
            rule_id: raw.rule_id.clone(),
            reason,
        })?;
        conditions.push(parsed);
    }
    Ok(PolicyRule {
        rule_id: raw.rule_id,
        name: raw.name,
        description: raw.description,
        action_types: raw.action_types,
        conditions,
        risk_score_modifier: raw.risk_score_modifier,
        enabled: raw.enabled,
        priority: raw.priority,
    })
}

/// Parse a YAML document into a rule list, rejecting the whole document if
/// any one rule is malformed. Fail-fast: a typo anywhere in the document
/// must not silently drop a rule.
///
/// # Errors
/// Returns [`PolicyStoreError::Parse`] or [`PolicyStoreError::InvalidRule`].
pub fn parse_rules_yaml(yaml: &str) -> Result<Vec<PolicyRule>, PolicyStoreError> {
    let file: RuleFile = serde_yaml::from_str(yaml).map_err(|e| PolicyStoreError::Parse(e.to_string()))?;
    let mut seen = std::collections::HashSet::new();
    let mut rules = Vec::with_capacity(file.rules.len());
    for raw in file.rules {
        let rule = parse_raw_rule(raw)?;
        if !seen.insert(rule.rule_id.clone()) {
            return Err(PolicyStoreError::DuplicateRuleId(rule.rule_id));
        }
        rules.push(rule);
    }
    Ok(rules)
}

/// Versioned, shared rule set. Readers take a read-only `Arc` snapshot;
/// writers replace it wholesale under a short-lived write lock, so a
/// reader never observes a partially updated rule set.
pub struct PolicyStore {
    snapshot: RwLock<Arc<HashMap<String, PolicyRule>>>,
    generation: Arc<AtomicU64>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        let map = rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect();
        Self {
            snapshot: RwLock::new(Arc::new(map)),
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn snapshot(&self) -> Arc<HashMap<String, PolicyRule>> {
        Arc::clone(&self.snapshot.read().expect("policy snapshot lock poisoned"))
    }

    /// Whether any rule has ever been loaded. The Risk Evaluator fails
    /// closed while this is `false`.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.generation.load(Ordering::Relaxed) > 1 || !self.snapshot().is_empty()
    }

    /// Current monotonically increasing generation, bumped by every write.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// List the current rule snapshot, enabled and disabled alike.
    #[must_use]
    pub fn list(&self) -> Vec<PolicyRule> {
        self.snapshot().values().cloned().collect()
    }

    /// Fetch a single rule by id.
    #[must_use]
    pub fn get(&self, rule_id: &str) -> Option<PolicyRule> {
        self.snapshot().get(rule_id).cloned()
    }

    /// Insert a new rule. Rejects an id collision rather than overwriting.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::DuplicateRuleId`].
    pub fn create(&self, rule: PolicyRule) -> Result<(), PolicyStoreError> {
        let mut guard = self.snapshot.write().expect("policy snapshot lock poisoned");
        if guard.contains_key(&rule.rule_id) {
            return Err(PolicyStoreError::DuplicateRuleId(rule.rule_id));
        }
        let mut next = (**guard).clone();
        next.insert(rule.rule_id.clone(), rule);
        *guard = Arc::new(next);
        self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a rule by id.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError::NotFound`].
    pub fn delete(&self, rule_id: &str) -> Result<(), PolicyStoreError> {
        let mut guard = self.snapshot.write().expect("policy snapshot lock poisoned");
        if !guard.contains_key(rule_id) {
            return Err(PolicyStoreError::NotFound(rule_id.to_string()));
        }
        let mut next = (**guard).clone();
        next.remove(rule_id);
        *guard = Arc::new(next);
        self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replace the entire rule set atomically, e.g. after a bulk reload
    /// from a YAML document.
    pub fn replace_all(&self, rules: Vec<PolicyRule>) {
        let map = rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect();
        let mut guard = self.snapshot.write().expect("policy snapshot lock poisoned");
        *guard = Arc::new(map);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule(id: &str) -> PolicyRule {
        PolicyRule {
            rule_id: id.into(),
            name: "sample".into(),
            description: None,
            action_types: vec![],
            conditions: vec![],
            risk_score_modifier: 0.1,
            enabled: true,
            priority: 0,
        }
    }

    #[test]
    fn empty_store_is_not_loaded() {
        let store = PolicyStore::empty();
        assert!(!store.is_loaded());
    }

    #[test]
    fn create_marks_store_loaded_and_bumps_generation() {
        let store = PolicyStore::empty();
        let gen0 = store.generation();
        store.create(sample_rule("r1")).unwrap();
        assert!(store.is_loaded());
        assert!(store.generation() > gen0);
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let store = PolicyStore::empty();
        store.create(sample_rule("r1")).unwrap();
        let err = store.create(sample_rule("r1")).unwrap_err();
        assert!(matches!(err, PolicyStoreError::DuplicateRuleId(_)));
    }

    #[test]
    fn delete_unknown_rule_errors() {
        let store = PolicyStore::empty();
        let err = store.delete("missing").unwrap_err();
        assert!(matches!(err, PolicyStoreError::NotFound(_)));
    }

    #[test]
    fn parse_rules_yaml_rejects_unknown_condition_kind() {
        let yaml = r"
rules:
  - rule_id: r1
    name: test
    risk_score_modifier: 0.5
    conditions:
      - kind: not_a_real_condition
";
        let err = parse_rules_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyStoreError::InvalidRule { .. }));
    }

    #[test]
    fn parse_rules_yaml_accepts_valid_document() {
        let yaml = r"
rules:
  - rule_id: r1
    name: large transfer
    risk_score_modifier: 0.6
    priority: 10
    conditions:
      - kind: max_amount
        value: 1000.0
";
        let rules = parse_rules_yaml(yaml).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority, 10);
    }

    #[test]
    fn parse_rules_yaml_rejects_duplicate_rule_ids() {
        let yaml = r"
rules:
  - rule_id: r1
    name: a
    risk_score_modifier: 0.1
  - rule_id: r1
    name: b
    risk_score_modifier: 0.2
";
        let err = parse_rules_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyStoreError::DuplicateRuleId(_)));
    }
}
