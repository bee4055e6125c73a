//! Approval Coordinator (component H): tracks `PENDING` decisions through
//! to a terminal `APPROVED`/`REJECTED`/`EXPIRED` state and notifies an
//! external reviewer over a webhook.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Terminal and non-terminal states of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A single pending-decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub request_id: String,
    pub agent_id: String,
    pub action_type: String,
    pub target_resource: String,
    pub risk_score: f64,
    pub status: ApprovalStatus,
    pub created_at_ms: u64,
    pub resolved_at_ms: Option<u64>,
    pub expires_at_ms: u64,
}

/// Errors [`ApprovalRegistry::resolve`] can return.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval {0} not found")]
    NotFound(String),
    /// The approval already reached a terminal state. Carries that state
    /// so a caller can tell an idempotent re-approval apart from a real
    /// conflict (e.g. approving something already rejected).
    #[error("approval {approval_id} already resolved as {status:?}")]
    AlreadyResolved { approval_id: String, status: ApprovalStatus },
}

/// In-memory registry of outstanding and resolved approvals. Resolution
/// is a one-shot terminal transition: once a record leaves `Pending` it
/// can never be mutated again, mirroring an allow-once consume.
pub struct ApprovalRegistry {
    records: DashMap<String, ApprovalRecord>,
    default_expiry_secs: u64,
}

impl ApprovalRegistry {
    #[must_use]
    pub fn new(default_expiry_secs: u64) -> Self {
        Self { records: DashMap::new(), default_expiry_secs }
    }

    /// Create a new pending approval, expiring `default_expiry_secs` from
    /// `now_ms` unless the caller asks to override that.
    pub fn create(
        &self,
        approval_id: String,
        request_id: String,
        agent_id: String,
        action_type: String,
        target_resource: String,
        risk_score: f64,
        now_ms: u64,
        expiry_secs_override: Option<u64>,
    ) -> ApprovalRecord {
        let expiry_secs = expiry_secs_override.unwrap_or(self.default_expiry_secs);
        let record = ApprovalRecord {
            approval_id: approval_id.clone(),
            request_id,
            agent_id,
            action_type,
            target_resource,
            risk_score,
            status: ApprovalStatus::Pending,
            created_at_ms: now_ms,
            resolved_at_ms: None,
            expires_at_ms: now_ms.saturating_add(expiry_secs.saturating_mul(1000)),
        };
        self.records.insert(approval_id, record.clone());
        record
    }

    #[must_use]
    pub fn get(&self, approval_id: &str) -> Option<ApprovalRecord> {
        self.records.get(approval_id).map(|r| r.clone())
    }

    /// Resolve a pending approval to `Approved` or `Rejected`.
    ///
    /// Lazily expires the record first if `now_ms` has passed
    /// `expires_at_ms`, so a reviewer resolving a stale approval always
    /// sees `AlreadyResolved { status: Expired }` rather than silently
    /// flipping an expired request to approved.
    ///
    /// # Errors
    /// Returns [`ApprovalError::NotFound`] or
    /// [`ApprovalError::AlreadyResolved`].
    pub fn resolve(
        &self,
        approval_id: &str,
        outcome: ApprovalStatus,
        now_ms: u64,
    ) -> Result<ApprovalRecord, ApprovalError> {
        debug_assert!(outcome.is_terminal());
        let mut entry =
            self.records.get_mut(approval_id).ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;

        if entry.status == ApprovalStatus::Pending && now_ms >= entry.expires_at_ms {
            entry.status = ApprovalStatus::Expired;
            entry.resolved_at_ms = Some(entry.expires_at_ms);
        }

        if entry.status.is_terminal() {
            return Err(ApprovalError::AlreadyResolved { approval_id: approval_id.to_string(), status: entry.status });
        }

        entry.status = outcome;
        entry.resolved_at_ms = Some(now_ms);
        Ok(entry.clone())
    }

    /// Transition every `Pending` record whose deadline has passed to
    /// `Expired`, returning the records that were swept. Intended to be
    /// called periodically by a background task.
    pub fn sweep_expired(&self, now_ms: u64) -> Vec<ApprovalRecord> {
        let mut swept = Vec::new();
        for mut entry in self.records.iter_mut() {
            if entry.status == ApprovalStatus::Pending && now_ms >= entry.expires_at_ms {
                entry.status = ApprovalStatus::Expired;
                entry.resolved_at_ms = Some(entry.expires_at_ms);
                swept.push(entry.clone());
            }
        }
        swept
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.status == ApprovalStatus::Pending).count()
    }
}

/// Body POSTed to the reviewer-facing webhook: the sanitized request plus
/// enough of the approval record for a reviewer to act on it and for the
/// external service to post back to the right callback.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalWebhookPayload<'a> {
    pub approval_id: &'a str,
    pub request_id: &'a str,
    pub agent_id: &'a str,
    pub action_type: &'a str,
    pub target_resource: &'a str,
    pub parameters: &'a serde_json::Value,
    pub risk_score: f64,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub callback_path: &'a str,
}

/// Errors from notifying the webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook did not succeed after {0} attempts")]
    Exhausted(u32),
}

/// Retry policy for webhook delivery: capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(250), max_delay: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.max_delay)
    }
}

/// Posts approval notifications to a reviewer webhook with retries.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(url: String, policy: RetryPolicy) -> Self {
        Self { client: reqwest::Client::new(), url, policy }
    }

    /// POST `payload` to the configured webhook, retrying transient
    /// failures with capped exponential backoff between attempts.
    ///
    /// # Errors
    /// Returns [`WebhookError::Exhausted`] once every attempt has failed.
    pub async fn notify(&self, payload: &ApprovalWebhookPayload<'_>) -> Result<(), WebhookError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.post(&self.url).json(payload).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), attempt, "approval webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "approval webhook request failed");
                }
            }
            if attempt >= self.policy.max_attempts {
                return Err(WebhookError::Exhausted(attempt));
            }
            tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
        }
    }
}

/// Shared handle a `GatewayService` clone hands to both the request path
/// (to create approvals) and a background sweeper task (to expire them).
pub type SharedApprovalRegistry = Arc<ApprovalRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ApprovalRegistry {
        ApprovalRegistry::new(86_400)
    }

    fn create_one(reg: &ApprovalRegistry, now_ms: u64) -> ApprovalRecord {
        reg.create(
            "appr-1".into(),
            "req-1".into(),
            "agent-1".into(),
            "transfer".into(),
            "acct-1".into(),
            0.85,
            now_ms,
            None,
        )
    }

    #[test]
    fn create_starts_pending() {
        let reg = registry();
        let record = create_one(&reg, 0);
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.expires_at_ms, 86_400_000);
    }

    #[test]
    fn resolve_transitions_to_terminal_state() {
        let reg = registry();
        create_one(&reg, 0);
        let resolved = reg.resolve("appr-1", ApprovalStatus::Approved, 10).unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_at_ms, Some(10));
    }

    #[test]
    fn resolve_is_not_idempotent_the_second_time() {
        let reg = registry();
        create_one(&reg, 0);
        reg.resolve("appr-1", ApprovalStatus::Approved, 10).unwrap();
        let err = reg.resolve("appr-1", ApprovalStatus::Rejected, 20).unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyResolved { status: ApprovalStatus::Approved, .. }));
    }

    #[test]
    fn resolve_past_deadline_reports_expired_not_the_requested_outcome() {
        let reg = registry();
        create_one(&reg, 0);
        let err = reg.resolve("appr-1", ApprovalStatus::Approved, 100_000_000).unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyResolved { status: ApprovalStatus::Expired, .. }));
    }

    #[test]
    fn resolve_missing_approval_errors() {
        let reg = registry();
        let err = reg.resolve("missing", ApprovalStatus::Approved, 0).unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }

    #[test]
    fn sweep_expired_only_touches_pending_past_deadline() {
        let reg = registry();
        create_one(&reg, 0);
        let swept = reg.sweep_expired(86_400_000);
        assert_eq!(swept.len(), 1);
        assert_eq!(reg.get("appr-1").unwrap().status, ApprovalStatus::Expired);
        // A second sweep finds nothing new to do.
        assert!(reg.sweep_expired(86_400_000).is_empty());
    }

    #[test]
    fn pending_count_excludes_resolved() {
        let reg = registry();
        create_one(&reg, 0);
        assert_eq!(reg.pending_count(), 1);
        reg.resolve("appr-1", ApprovalStatus::Rejected, 10).unwrap();
        assert_eq!(reg.pending_count(), 0);
    }

    #[test]
    fn retry_policy_backoff_is_capped() {
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(100), max_delay: Duration::from_millis(300) };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(10), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn notify_fails_closed_after_exhausting_attempts_against_an_unreachable_host() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:1/unreachable".into(),
            RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) },
        );
        let parameters = serde_json::json!({"amount": 15000});
        let payload = ApprovalWebhookPayload {
            approval_id: "appr-1",
            request_id: "req-1",
            agent_id: "agent-1",
            action_type: "transfer",
            target_resource: "acct-1",
            parameters: &parameters,
            risk_score: 0.9,
            created_at_ms: 0,
            expires_at_ms: 1,
            callback_path: "/api/v1/approvals/appr-1/callback",
        };
        let err = notifier.notify(&payload).await.unwrap_err();
        assert!(matches!(err, WebhookError::Exhausted(2)));
    }
}
