//! Wires the nine pipeline components into one request-evaluation path:
//! authenticate, rate-check, sanitize, evaluate, decide, escalate if
//! pending, audit, respond.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sentinel_approval::{
    ApprovalError, ApprovalRegistry, ApprovalStatus, ApprovalWebhookPayload, RetryPolicy, WebhookNotifier,
};
use sentinel_audit::{AuditEntry, AuditId, DegradedAuditBuffer, JsonlAuditLog, MatchedRule as AuditMatchedRule};
use sentinel_auth::{AuthError, InMemoryKeyStore, KeyStore};
use sentinel_core::degradation::DegradationEvent;
use sentinel_core::error::GatewayError;
use sentinel_core::ids;
use sentinel_decision::{decide, risk_level, DecisionThresholds, EmittedDecision, Verdict};
use sentinel_mode::{GatewayMode, Mode, ModeBroadcast, NoopBroadcast};
use sentinel_policy::{PolicyEngine, PolicyRule, PolicyStore, PolicyStoreError};
use sentinel_ratelimit::{InMemoryRateStore, RateLimiter};
use sentinel_telemetry::GatewayMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info_span, instrument, warn};

/// Configuration assembled from the environment. Mirrors the recognized
/// keys named in the external interfaces table; nothing here dials a
/// connection, it only resolves values other components consume.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub initial_mode: Mode,
    pub thresholds: DecisionThresholds,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub approval_webhook_url: String,
    pub approval_expiry_secs: u64,
    pub counter_store_url: Option<String>,
    pub audit_store_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            initial_mode: Mode::Enforce,
            thresholds: DecisionThresholds::default(),
            rate_limit_requests: 60,
            rate_limit_window_secs: 60,
            approval_webhook_url: String::new(),
            approval_expiry_secs: 86_400,
            counter_store_url: None,
            audit_store_url: None,
        }
    }
}

impl GatewayConfig {
    /// Build a config from the process environment, falling back to the
    /// documented defaults for any key that is absent or malformed.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let initial_mode = std::env::var("MODE")
            .ok()
            .and_then(|raw| Mode::parse(&raw).ok())
            .unwrap_or(defaults.initial_mode);
        let approval_threshold = std::env::var("APPROVAL_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.thresholds.approval_threshold);
        let block_threshold = std::env::var("BLOCK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.thresholds.block_threshold);
        let rate_limit_requests = std::env::var("RATE_LIMIT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_requests);
        let rate_limit_window_secs = std::env::var("RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_window_secs);
        let approval_webhook_url = std::env::var("APPROVAL_WEBHOOK_URL").unwrap_or(defaults.approval_webhook_url);
        let approval_expiry_secs = std::env::var("APPROVAL_EXPIRY_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.approval_expiry_secs);
        let counter_store_url = std::env::var("COUNTER_STORE_URL").ok();
        let audit_store_url = std::env::var("AUDIT_STORE_URL").ok();

        Self {
            initial_mode,
            thresholds: DecisionThresholds { approval_threshold, block_threshold },
            rate_limit_requests,
            rate_limit_window_secs,
            approval_webhook_url,
            approval_expiry_secs,
            counter_store_url,
            audit_store_url,
        }
    }
}

/// Seam for the out-of-scope "forward the request to its target system"
/// step. The default just echoes the parameters back, standing in for a
/// real backend call the way [`NoopBroadcast`] stands in for a real
/// shared-cache pub/sub.
pub trait TargetForwarder: Send + Sync {
    fn forward(&self, target_resource: &str, parameters: &Value) -> Value;
}

/// Default forwarder: acknowledges without calling anything real.
#[derive(Default)]
pub struct NoopForwarder;

impl TargetForwarder for NoopForwarder {
    fn forward(&self, target_resource: &str, parameters: &Value) -> Value {
        serde_json::json!({"acknowledged": true, "target_resource": target_resource, "echo": parameters})
    }
}

/// Body of `POST /api/v1/gateway/evaluate`.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub agent_id: String,
    pub action_type: String,
    pub target_resource: String,
    #[serde(default = "serde_json::Value::default")]
    pub parameters: Value,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Caller-facing status string, distinct from the internal `decision`
/// enum so the two can drift in wording without a breaking schema bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluateStatus {
    Allowed,
    Denied,
    PendingApproval,
}

/// One rule that contributed to the risk score, as reported back to the
/// caller.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedPolicy {
    pub rule_id: String,
    pub name: String,
    pub risk_score_modifier: f64,
}

/// Body of `POST /api/v1/gateway/evaluate`'s response.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub request_id: String,
    pub status: EvaluateStatus,
    pub decision: EmittedDecision,
    pub message: String,
    pub risk_level: sentinel_decision::RiskLevel,
    pub risk_score: f64,
    pub matched_policies: Vec<MatchedPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_response: Option<Value>,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_decision: Option<Verdict>,
}

impl EvaluateResponse {
    /// HTTP status an out-of-scope transport layer would use.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.decision {
            EmittedDecision::Allow => 200,
            EmittedDecision::Deny => 403,
            EmittedDecision::Pending => 202,
        }
    }
}

/// Body of `PUT /api/v1/gateway/mode`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

/// Body of `POST /api/v1/approvals/{approval_id}/callback`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalCallbackRequest {
    pub decision: String,
    pub decided_by: String,
}

/// Response of a resolved approval callback.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalCallbackResponse {
    pub approval_id: String,
    pub status: ApprovalStatus,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_response: Option<Value>,
}

/// One page of `GET /api/v1/audit/logs`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogsPage {
    pub entries: Vec<sentinel_audit::AuditRecord>,
    pub next_cursor: Option<AuditId>,
}

/// A pending request's sanitized-and-original parameter pair, kept around
/// between the `PENDING` response and the eventual approval callback so
/// the original parameters can still be forwarded on approval per the
/// stated policy ("the original parameters are forwarded; the sanitized
/// copy is audited").
struct AwaitingApproval {
    request_id: String,
    agent_id: String,
    action_type: String,
    target_resource: String,
    original_parameters: Value,
    matched_rules: Vec<AuditMatchedRule>,
    risk_score: f64,
}

/// Wires components A-I into the single pipeline described for
/// `evaluate`, plus the surrounding mode/policy/approval/audit surface.
pub struct GatewayService {
    key_store: Arc<dyn KeyStore>,
    rate_limiter: RateLimiter<InMemoryRateStore>,
    policy_engine: PolicyEngine,
    mode: GatewayMode,
    mode_broadcast: Arc<dyn ModeBroadcast>,
    thresholds: DecisionThresholds,
    approvals: Arc<ApprovalRegistry>,
    pending_requests: DashMap<String, AwaitingApproval>,
    webhook: Option<WebhookNotifier>,
    forwarder: Arc<dyn TargetForwarder>,
    audit_log: JsonlAuditLog,
    audit_degraded: Arc<DegradedAuditBuffer>,
    next_audit_id: AtomicU64,
    metrics: Arc<GatewayMetrics>,
}

/// Deadline on the sanitizer's full detector pass before it degrades to
/// the fast regex subset, per the concurrency model's PII scan budget.
const SANITIZE_BUDGET: Duration = Duration::from_millis(500);

impl GatewayService {
    /// Build a service from its config and the stores it should wire up.
    /// `audit_path` backs the JSONL audit log; `keys` seeds the in-memory
    /// key store; `rules` seeds the policy store.
    ///
    /// # Errors
    /// Returns an error if the audit log file cannot be opened.
    pub fn new(
        config: &GatewayConfig,
        keys: Vec<sentinel_auth::AgentKey>,
        rules: Vec<PolicyRule>,
        audit_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, sentinel_audit::AuditError> {
        let key_store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new(keys));
        let rate_limiter =
            RateLimiter::new(InMemoryRateStore::new(), config.rate_limit_requests, config.rate_limit_window_secs);
        let metrics = Arc::new(GatewayMetrics::new());
        let policy_engine = PolicyEngine::new(PolicyStore::new(rules))
            .with_observer(Arc::new(sentinel_telemetry::MetricsPolicyObserver::new(Arc::clone(&metrics))));
        let webhook = if config.approval_webhook_url.is_empty() {
            None
        } else {
            Some(WebhookNotifier::new(config.approval_webhook_url.clone(), RetryPolicy::default()))
        };
        let audit_log = JsonlAuditLog::open(audit_path)?;

        Ok(Self {
            key_store,
            rate_limiter,
            policy_engine,
            mode: GatewayMode::new(config.initial_mode),
            mode_broadcast: Arc::new(NoopBroadcast),
            thresholds: config.thresholds,
            approvals: Arc::new(ApprovalRegistry::new(config.approval_expiry_secs)),
            pending_requests: DashMap::new(),
            webhook,
            forwarder: Arc::new(NoopForwarder),
            audit_log,
            audit_degraded: Arc::new(DegradedAuditBuffer::new(1024)),
            next_audit_id: AtomicU64::new(1),
            metrics,
        })
    }

    /// Swap in a broadcaster for cross-instance mode propagation.
    #[must_use]
    pub fn with_mode_broadcast(mut self, broadcast: Arc<dyn ModeBroadcast>) -> Self {
        self.mode_broadcast = broadcast;
        self
    }

    /// Swap in a forwarder for the out-of-scope backend call.
    #[must_use]
    pub fn with_forwarder(mut self, forwarder: Arc<dyn TargetForwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Share a handle to this service's approval registry, for a caller
    /// that wants to run [`ApprovalRegistry::sweep_expired`] on an
    /// interval in a background task.
    #[must_use]
    pub fn approvals(&self) -> Arc<ApprovalRegistry> {
        Arc::clone(&self.approvals)
    }

    /// Share a handle to this service's metrics surface.
    #[must_use]
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    fn next_audit_id(&self) -> AuditId {
        self.next_audit_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Append an entry, falling back to the bounded in-memory buffer on
    /// an I/O failure rather than failing the request.
    fn write_audit(&self, entry: AuditEntry) {
        let id = self.next_audit_id();
        let now_ms = ids::now_ms();
        match self.audit_log.append(id, now_ms, entry.clone()) {
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "audit write failed, buffering");
                self.audit_degraded.push(sentinel_audit::AuditRecord { id, ts_ms: now_ms, entry });
            }
        }
    }

    /// Authenticate, rate-check, sanitize, evaluate, decide, escalate if
    /// pending, audit, and respond — the one pipeline every inbound
    /// request runs through.
    ///
    /// # Errors
    /// Returns [`GatewayError::Unauthenticated`] or
    /// [`GatewayError::RateLimited`] before any audit entry is written;
    /// every other outcome (allow/deny/pending) is `Ok`, carrying its own
    /// status rather than an error, since all three are successful
    /// pipeline completions.
    #[instrument(skip(self, raw_key, req), fields(action_type = %req.action_type))]
    pub async fn evaluate(&self, raw_key: &str, req: EvaluateRequest) -> Result<EvaluateResponse, GatewayError> {
        let request_id = ids::new_request_id();
        let now_ms = ids::now_ms();

        let agent = {
            let _span = info_span!("authenticate").entered();
            self.key_store.resolve(raw_key).map_err(|e| match e {
                AuthError::Malformed | AuthError::Unknown | AuthError::Disabled => GatewayError::Unauthenticated,
            })?
        };

        let (rate_decision, degradation) = {
            let _span = info_span!("rate_check").entered();
            self.rate_limiter.check(&agent.agent_id, agent.rate_limit_override, now_ms)
        };
        if let Some(event) = degradation {
            self.note_degradation(event);
        }
        if !rate_decision.allowed {
            let retry_after_secs = rate_decision.reset_at_ms.saturating_sub(now_ms) / 1000;
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        let engine_output = {
            let _span = info_span!("sanitize_and_evaluate").entered();
            self.policy_engine.process(&req.action_type, &req.target_resource, &req.parameters, now_ms, SANITIZE_BUDGET)
        };
        if engine_output.degraded_sanitization {
            self.note_degradation(DegradationEvent::new("sanitizer", "full detector pass exceeded its deadline"));
        }
        if !self.policy_engine.store.is_loaded() {
            self.note_degradation(DegradationEvent::new("policy_store", "no rule snapshot loaded, failing closed"));
        }

        let mode = self.mode.get();
        let decision = decide(engine_output.evaluation.risk_score, mode, self.thresholds);
        self.metrics.record_request(&agent.agent_id, &req.action_type, decision_label(decision.emitted));
        self.metrics.record_risk_score(engine_output.evaluation.risk_score);

        let matched_rules: Vec<AuditMatchedRule> = engine_output
            .evaluation
            .matched_rules
            .iter()
            .map(|m| AuditMatchedRule {
                rule_id: m.rule_id.clone(),
                name: m.name.clone(),
                risk_score_modifier: m.risk_score_modifier,
            })
            .collect();
        let matched_policies: Vec<MatchedPolicy> = matched_rules
            .iter()
            .map(|m| MatchedPolicy { rule_id: m.rule_id.clone(), name: m.name.clone(), risk_score_modifier: m.risk_score_modifier })
            .collect();

        let mut approval_id = None;
        let mut approval_url = None;
        if decision.true_verdict == Verdict::Pending {
            let id = ids::new_approval_id();
            let record = self.approvals.create(
                id.clone(),
                request_id.clone(),
                agent.agent_id.clone(),
                req.action_type.clone(),
                req.target_resource.clone(),
                engine_output.evaluation.risk_score,
                now_ms,
                None,
            );
            self.pending_requests.insert(
                id.clone(),
                AwaitingApproval {
                    request_id: request_id.clone(),
                    agent_id: agent.agent_id.clone(),
                    action_type: req.action_type.clone(),
                    target_resource: req.target_resource.clone(),
                    original_parameters: req.parameters.clone(),
                    matched_rules: matched_rules.clone(),
                    risk_score: engine_output.evaluation.risk_score,
                },
            );
            self.metrics.set_pending_approvals(self.approvals.pending_count() as u64);
            self.notify_webhook(&record, &engine_output.masked_parameters).await;
            approval_url = Some(format!("/api/v1/approvals/{id}"));
            approval_id = Some(id);
        }

        let forwarded = decision.emitted == EmittedDecision::Allow;
        let target_response = if forwarded {
            Some(self.forwarder.forward(&req.target_resource, &req.parameters))
        } else {
            None
        };
        let target_response_digest = target_response
            .as_ref()
            .map(|v| sentinel_audit::sha256_hex(v.to_string().as_bytes()));

        self.write_audit(AuditEntry {
            request_id: request_id.clone(),
            agent_id: agent.agent_id.clone(),
            action_type: req.action_type.clone(),
            target_resource: req.target_resource.clone(),
            sanitized_parameters: engine_output.masked_parameters,
            decision: decision.emitted,
            risk_score: engine_output.evaluation.risk_score,
            risk_level: risk_level(engine_output.evaluation.risk_score),
            matched_rules,
            mode_in_effect: mode,
            approval_id: approval_id.clone(),
            forwarded,
            target_response_digest,
        });

        let status = match decision.emitted {
            EmittedDecision::Allow => EvaluateStatus::Allowed,
            EmittedDecision::Deny => EvaluateStatus::Denied,
            EmittedDecision::Pending => EvaluateStatus::PendingApproval,
        };

        Ok(EvaluateResponse {
            request_id,
            status,
            decision: decision.emitted,
            message: engine_output.evaluation.reason.unwrap_or_default(),
            risk_level: risk_level(engine_output.evaluation.risk_score),
            risk_score: engine_output.evaluation.risk_score,
            matched_policies,
            approval_id,
            approval_url,
            forwarded,
            target_response,
            mode,
            observed_decision: decision.observed_decision(),
        })
    }

    async fn notify_webhook(&self, record: &sentinel_approval::ApprovalRecord, masked_parameters: &Value) {
        let Some(webhook) = &self.webhook else { return };
        let payload = ApprovalWebhookPayload {
            approval_id: &record.approval_id,
            request_id: &record.request_id,
            agent_id: &record.agent_id,
            action_type: &record.action_type,
            target_resource: &record.target_resource,
            parameters: masked_parameters,
            risk_score: record.risk_score,
            created_at_ms: record.created_at_ms,
            expires_at_ms: record.expires_at_ms,
            callback_path: &format!("/api/v1/approvals/{}/callback", record.approval_id),
        };
        if let Err(err) = webhook.notify(&payload).await {
            warn!(error = %err, approval_id = %record.approval_id, "approval webhook failed, remains pending");
        }
    }

    fn note_degradation(&self, event: DegradationEvent) {
        warn!(component = %event.component, reason = %event.reason, "component degraded");
    }

    /// `GET /api/v1/gateway/mode`.
    #[must_use]
    pub fn get_mode(&self) -> Mode {
        self.mode.get()
    }

    /// `PUT /api/v1/gateway/mode`.
    ///
    /// # Errors
    /// Returns [`GatewayError::BadRequest`] if `raw` is neither `OBSERVE`
    /// nor `ENFORCE`.
    pub fn set_mode(&self, raw: &str) -> Result<Mode, GatewayError> {
        let mode = Mode::parse(raw).map_err(GatewayError::BadRequest)?;
        self.mode.set(mode, self.mode_broadcast.as_ref());
        Ok(mode)
    }

    /// `GET /api/v1/policies`.
    #[must_use]
    pub fn list_policies(&self) -> Vec<PolicyRule> {
        self.policy_engine.store.list()
    }

    /// `GET /api/v1/policies/{rule_id}`.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`].
    pub fn get_policy(&self, rule_id: &str) -> Result<PolicyRule, GatewayError> {
        self.policy_engine.store.get(rule_id).ok_or_else(|| GatewayError::NotFound(rule_id.to_string()))
    }

    /// `POST /api/v1/policies`.
    ///
    /// # Errors
    /// Returns [`GatewayError::BadRequest`] on a duplicate `rule_id`.
    pub fn create_policy(&self, rule: PolicyRule) -> Result<(), GatewayError> {
        self.policy_engine.store.create(rule).map_err(policy_store_error_to_gateway)?;
        self.metrics.set_active_policy_rules(self.policy_engine.store.list().len() as u64);
        Ok(())
    }

    /// `DELETE /api/v1/policies/{rule_id}`.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`].
    pub fn delete_policy(&self, rule_id: &str) -> Result<(), GatewayError> {
        self.policy_engine.store.delete(rule_id).map_err(policy_store_error_to_gateway)?;
        self.metrics.set_active_policy_rules(self.policy_engine.store.list().len() as u64);
        Ok(())
    }

    /// Bulk-replace the policy set, e.g. from a loaded YAML document.
    pub fn replace_policies(&self, rules: Vec<PolicyRule>) {
        self.policy_engine.store.replace_all(rules);
        self.metrics.set_active_policy_rules(self.policy_engine.store.list().len() as u64);
    }

    /// `GET /api/v1/approvals/{approval_id}`.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`].
    pub fn get_approval(&self, approval_id: &str) -> Result<sentinel_approval::ApprovalRecord, GatewayError> {
        self.approvals.get(approval_id).ok_or_else(|| GatewayError::NotFound(approval_id.to_string()))
    }

    /// `POST /api/v1/approvals/{approval_id}/callback`. On transition to
    /// `APPROVED`, re-enters the forwarding path for the original
    /// (unsanitized) parameters, per the stated forwarding policy; on
    /// `REJECTED` or an already-terminal state, only the audit trail is
    /// updated.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`], [`GatewayError::BadRequest`]
    /// for an unrecognized `decision` value, or
    /// [`GatewayError::CallbackConflict`] for a non-idempotent repeat of
    /// an already-terminal approval (a repeat of the *same* terminal
    /// outcome is not an error, per the idempotence requirement).
    #[instrument(skip(self, req), fields(approval_id = %approval_id))]
    pub fn approval_callback(
        &self,
        approval_id: &str,
        req: ApprovalCallbackRequest,
    ) -> Result<ApprovalCallbackResponse, GatewayError> {
        let outcome = match req.decision.to_ascii_lowercase().as_str() {
            "approved" | "approve" => ApprovalStatus::Approved,
            "rejected" | "reject" => ApprovalStatus::Rejected,
            other => return Err(GatewayError::BadRequest(format!("unrecognized decision: {other}"))),
        };
        let now_ms = ids::now_ms();

        let record = match self.approvals.resolve(approval_id, outcome, now_ms) {
            Ok(record) => record,
            Err(ApprovalError::NotFound(id)) => return Err(GatewayError::NotFound(id)),
            Err(ApprovalError::AlreadyResolved { status, .. }) if status == outcome => {
                return Ok(ApprovalCallbackResponse { approval_id: approval_id.to_string(), status, forwarded: false, target_response: None })
            }
            Err(ApprovalError::AlreadyResolved { .. }) => return Err(GatewayError::CallbackConflict),
        };
        self.metrics.set_pending_approvals(self.approvals.pending_count() as u64);

        let awaiting = self.pending_requests.remove(approval_id).map(|(_, v)| v);
        let forwarded = record.status == ApprovalStatus::Approved;
        let target_response = if forwarded {
            awaiting.as_ref().map(|a| self.forwarder.forward(&a.target_resource, &a.original_parameters))
        } else {
            None
        };
        let target_response_digest =
            target_response.as_ref().map(|v| sentinel_audit::sha256_hex(v.to_string().as_bytes()));

        if let Some(awaiting) = awaiting {
            self.write_audit(AuditEntry {
                request_id: awaiting.request_id,
                agent_id: awaiting.agent_id,
                action_type: awaiting.action_type,
                target_resource: awaiting.target_resource,
                sanitized_parameters: serde_json::json!({}),
                decision: if forwarded { EmittedDecision::Allow } else { EmittedDecision::Deny },
                risk_score: awaiting.risk_score,
                risk_level: risk_level(awaiting.risk_score),
                matched_rules: awaiting.matched_rules,
                mode_in_effect: self.mode.get(),
                approval_id: Some(approval_id.to_string()),
                forwarded,
                target_response_digest,
            });
        }

        Ok(ApprovalCallbackResponse { approval_id: approval_id.to_string(), status: record.status, forwarded, target_response })
    }

    /// `GET /api/v1/audit/logs`: a page of entries with `id` in
    /// `[start, start + limit)`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Internal`] if the log cannot be read.
    pub fn audit_logs(&self, start: AuditId, limit: u64, request_id: &str) -> Result<AuditLogsPage, GatewayError> {
        let entries = self
            .audit_log
            .read_range(start, start.saturating_add(limit))
            .map_err(|_| GatewayError::Internal { request_id: request_id.to_string() })?;
        let next_cursor = if entries.len() as u64 == limit { Some(start + limit) } else { None };
        Ok(AuditLogsPage { entries, next_cursor })
    }
}

fn decision_label(decision: EmittedDecision) -> &'static str {
    match decision {
        EmittedDecision::Allow => "allow",
        EmittedDecision::Deny => "deny",
        EmittedDecision::Pending => "pending",
    }
}

fn policy_store_error_to_gateway(err: PolicyStoreError) -> GatewayError {
    match err {
        PolicyStoreError::DuplicateRuleId(id) => GatewayError::BadRequest(format!("rule {id} already exists")),
        PolicyStoreError::NotFound(id) => GatewayError::NotFound(id),
        PolicyStoreError::InvalidRule { rule_id, reason } => {
            GatewayError::BadRequest(format!("invalid rule {rule_id}: {reason}"))
        }
        PolicyStoreError::Parse(reason) => GatewayError::BadRequest(reason),
    }
}
