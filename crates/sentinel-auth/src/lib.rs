//! Key Store & Authentication (component A): resolves a raw bearer key to
//! an agent identity, or rejects it.

#![deny(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed prefix every well-formed key must carry.
pub const KEY_PREFIX: &str = "sk-agent-";

/// An agent identity resolved from a key lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentKey {
    /// The raw key string (never logged downstream of this crate).
    pub key: String,
    /// Stable agent identifier.
    pub agent_id: String,
    /// Whether this key is currently usable.
    pub enabled: bool,
    /// Scopes granted to this agent.
    pub scopes: HashSet<String>,
    /// Per-agent override for the rate limiter's request budget.
    pub rate_limit_override: Option<u32>,
}

/// Authentication failure reasons.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The key is missing, empty, or lacks [`KEY_PREFIX`].
    #[error("malformed key")]
    Malformed,
    /// The key is well-formed but has no matching agent.
    #[error("unknown key")]
    Unknown,
    /// The key resolves to an agent whose key is disabled.
    #[error("agent disabled")]
    Disabled,
}

/// Resolves bearer keys to agent identities.
pub trait KeyStore: Send + Sync {
    /// Attempt to resolve a raw bearer key.
    ///
    /// # Errors
    /// Returns [`AuthError`] when the key is malformed, unknown, or
    /// resolves to a disabled agent.
    fn resolve(&self, raw_key: &str) -> Result<AgentKey, AuthError>;
}

/// Constant-time-ish prefix check: always walks the full prefix length
/// regardless of where the first mismatch occurs, rather than returning
/// early on `!=`.
#[must_use]
pub fn has_valid_prefix(raw_key: &str) -> bool {
    let prefix = KEY_PREFIX.as_bytes();
    let candidate = raw_key.as_bytes();
    if candidate.len() < prefix.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in prefix.iter().zip(&candidate[..prefix.len()]) {
        diff |= a ^ b;
    }
    diff == 0
}

/// In-memory, copy-on-write key table. Refreshing the table swaps an
/// `Arc` snapshot so readers never block on a writer.
pub struct InMemoryKeyStore {
    table: RwLock<Arc<HashMap<String, AgentKey>>>,
}

impl InMemoryKeyStore {
    /// Build a key store from an initial set of keys.
    #[must_use]
    pub fn new(keys: Vec<AgentKey>) -> Self {
        let table = keys.into_iter().map(|k| (k.key.clone(), k)).collect();
        Self { table: RwLock::new(Arc::new(table)) }
    }

    /// Replace the entire key table with a fresh snapshot.
    pub fn refresh(&self, keys: Vec<AgentKey>) {
        let table = keys.into_iter().map(|k| (k.key.clone(), k)).collect();
        *self.table.write().unwrap() = Arc::new(table);
    }

    fn snapshot(&self) -> Arc<HashMap<String, AgentKey>> {
        Arc::clone(&self.table.read().unwrap())
    }
}

impl KeyStore for InMemoryKeyStore {
    fn resolve(&self, raw_key: &str) -> Result<AgentKey, AuthError> {
        if !has_valid_prefix(raw_key) {
            return Err(AuthError::Malformed);
        }
        let snapshot = self.snapshot();
        let agent = snapshot.get(raw_key).ok_or(AuthError::Unknown)?;
        if !agent.enabled {
            return Err(AuthError::Disabled);
        }
        Ok(agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, enabled: bool) -> AgentKey {
        AgentKey {
            key: format!("{KEY_PREFIX}{id}"),
            agent_id: id.to_string(),
            enabled,
            scopes: HashSet::new(),
            rate_limit_override: None,
        }
    }

    #[test]
    fn rejects_missing_prefix() {
        let store = InMemoryKeyStore::new(vec![]);
        assert_eq!(store.resolve("nope"), Err(AuthError::Malformed));
    }

    #[test]
    fn rejects_unknown_key() {
        let store = InMemoryKeyStore::new(vec![]);
        assert_eq!(store.resolve("sk-agent-ghost"), Err(AuthError::Unknown));
    }

    #[test]
    fn rejects_disabled_agent_even_if_well_formed() {
        let store = InMemoryKeyStore::new(vec![key("bot", false)]);
        assert_eq!(store.resolve("sk-agent-bot"), Err(AuthError::Disabled));
    }

    #[test]
    fn resolves_enabled_agent() {
        let store = InMemoryKeyStore::new(vec![key("bot", true)]);
        let agent = store.resolve("sk-agent-bot").unwrap();
        assert_eq!(agent.agent_id, "bot");
    }

    #[test]
    fn refresh_replaces_snapshot_without_blocking_readers() {
        let store = InMemoryKeyStore::new(vec![key("bot", true)]);
        assert!(store.resolve("sk-agent-bot").is_ok());
        store.refresh(vec![key("bot2", true)]);
        assert_eq!(store.resolve("sk-agent-bot"), Err(AuthError::Unknown));
        assert!(store.resolve("sk-agent-bot2").is_ok());
    }
}
