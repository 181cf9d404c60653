//! Workflow instance lifecycle orchestration (C8, §4.8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use occam_core::audit::{AuditEvent, EventOutcome, EventSeverity, EventType};
use occam_core::error::{Error, ErrorCode, Result};
use occam_core::telemetry::DecisionEvent;
use occam_core::{AuditLogger, SecureVault, TelemetryService};
use occam_ontology::SchemaRegistry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::factbox::FactBox;
use crate::governance::{GovernanceEngine, TransactionContext};
use crate::notification::{Channel, NotificationDispatcher, NotificationMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: String,
    pub to: String,
    pub actor: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub approval_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub entity_id: String,
    pub policy_id: String,
    pub policy_version: semver::Version,
    pub current_state: String,
    pub history: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// The state a parked instance resumes to once its pending approval is
    /// decided. Internal bookkeeping, not part of the external contract.
    parked_target: Option<String>,
}

fn is_terminal(state: &str) -> bool {
    matches!(state, "closed" | "denied")
}

/// Fixed default transition table (§3.2). Both `approval.granted` and
/// `approval.denied` are intercepted in [`WorkflowOrchestrator::advance`]
/// and routed to [`WorkflowOrchestrator::resolve_approval_event`] before this
/// table is ever consulted for them — `approval.granted` resolves dynamically
/// against `parked_target`, and denial always goes to `"denied"` — so neither
/// event has an entry here.
fn resolve_transition(current: &str, event: &str) -> Option<&'static str> {
    match (current, event) {
        ("draft", "ingest") => Some("pending_review"),
        ("pending_review", "validate") => Some("validating"),
        ("validating", "generate_form") => Some("approved"),
        ("approved", "process_payment") => Some("submitted"),
        ("submitted", "attempt_submission") => Some("confirmed"),
        ("failed", "retry") => Some("submitted"),
        ("confirmed", "close") => Some("closed"),
        _ => None,
    }
}

/// Maps a transition event to the decision-node telemetry tag it represents
/// (§4.8). `attempt_submission` is handled separately inside
/// [`WorkflowOrchestrator::handle_submission`] since it spans the two
/// decision nodes `submission-attempt` and `confirmation-received`.
fn decision_node_for(event: &str) -> Option<&'static str> {
    match event {
        "ingest" => Some("data-ingestion"),
        "validate" => Some("validation-check"),
        "generate_form" => Some("form-generation"),
        "process_payment" => Some("payment-processing"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub event: String,
    pub actor: String,
    pub reason: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdvanceOutcome {
    Committed { to_state: String },
    Parked { approval_request_id: String },
    Escalated,
}

/// An external submission collaborator the `submitted -> confirmed` edge
/// retries through (§4.8 Retries). No adapter means every submission
/// succeeds immediately, which is sufficient where no external system is
/// wired in.
#[async_trait]
pub trait SubmissionAdapter: Send + Sync {
    async fn submit(&self, instance: &WorkflowInstance) -> Result<()>;
}

/// Owns every `WorkflowInstance` and executes `advance()` under a
/// per-`workflowId` exclusive lock (§5), fanning out to C1/C5/C6/C7/C9 as
/// pre-transition guards and side effects.
pub struct WorkflowOrchestrator {
    instances: DashMap<String, Arc<Mutex<WorkflowInstance>>>,
    audit: Arc<AuditLogger>,
    telemetry: Arc<TelemetryService>,
    vault: Arc<SecureVault>,
    factbox: Arc<FactBox>,
    governance: Arc<GovernanceEngine>,
    notifications: Arc<NotificationDispatcher>,
    schemas: Arc<SchemaRegistry>,
    submission_adapter: Option<Arc<dyn SubmissionAdapter>>,
    max_submission_attempts: u32,
    submission_backoff: StdDuration,
}

impl WorkflowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audit: Arc<AuditLogger>,
        telemetry: Arc<TelemetryService>,
        vault: Arc<SecureVault>,
        factbox: Arc<FactBox>,
        governance: Arc<GovernanceEngine>,
        notifications: Arc<NotificationDispatcher>,
        schemas: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            instances: DashMap::new(),
            audit,
            telemetry,
            vault,
            factbox,
            governance,
            notifications,
            schemas,
            submission_adapter: None,
            max_submission_attempts: 5,
            submission_backoff: StdDuration::from_millis(100),
        }
    }

    pub fn with_submission_adapter(mut self, adapter: Arc<dyn SubmissionAdapter>) -> Self {
        self.submission_adapter = Some(adapter);
        self
    }

    pub fn create(
        &self,
        entity_id: impl Into<String>,
        policy_id: impl Into<String>,
        policy_version: semver::Version,
    ) -> WorkflowInstance {
        let instance = WorkflowInstance {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            policy_id: policy_id.into(),
            policy_version,
            current_state: "draft".to_string(),
            history: Vec::new(),
            started_at: Utc::now(),
            closed_at: None,
            parked_target: None,
        };
        self.instances
            .insert(instance.id.clone(), Arc::new(Mutex::new(instance.clone())));
        instance
    }

    pub async fn status(&self, workflow_id: &str) -> Result<WorkflowInstance> {
        let handle = self
            .instances
            .get(workflow_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found(format!("workflow {} not found", workflow_id)))?;
        Ok(handle.lock().await.clone())
    }

    pub async fn history(&self, workflow_id: &str) -> Result<Vec<StateTransition>> {
        Ok(self.status(workflow_id).await?.history)
    }

    pub async fn escalate(
        &self,
        workflow_id: &str,
        actor: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<AdvanceOutcome> {
        self.advance(
            workflow_id,
            AdvanceRequest {
                event: "escalate".to_string(),
                actor: actor.into(),
                reason: target.into(),
                payload: serde_json::Value::Null,
            },
        )
        .await
    }

    pub async fn advance(&self, workflow_id: &str, request: AdvanceRequest) -> Result<AdvanceOutcome> {
        let handle = self
            .instances
            .get(workflow_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found(format!("workflow {} not found", workflow_id)))?;
        let mut guard = handle.lock().await;
        let instance = &mut *guard;

        if is_terminal(&instance.current_state) {
            return Err(Error::conflict(format!(
                "workflow {} is already {}",
                workflow_id, instance.current_state
            )));
        }

        if request.event == "escalate" {
            return self.commit_escalation(instance, workflow_id, &request).await;
        }

        if request.event == "approval.granted" || request.event == "approval.denied" {
            return self.resolve_approval_event(instance, workflow_id, &request).await;
        }

        let to_state = match resolve_transition(&instance.current_state, &request.event) {
            Some(s) => s,
            None => {
                self.audit
                    .log_state_transition(workflow_id, &instance.current_state, "invalid", EventOutcome::Failure)
                    .await?;
                return Err(Error::validation(format!(
                    "no transition for event '{}' from state '{}'",
                    request.event, instance.current_state
                )));
            }
        };

        if request.event == "attempt_submission" {
            return self.handle_submission(instance, workflow_id, &request).await;
        }

        let node_started = Instant::now();

        // Guards (§4.8 step 4): entity checks via C6, schema via C5, governance via C7.
        if self.factbox.get_entity(&instance.entity_id).is_some() && !self.factbox.verify_kyc(&instance.entity_id) {
            self.audit
                .log_state_transition(workflow_id, &instance.current_state, "kyc-check-failed", EventOutcome::Failure)
                .await?;
            return Err(Error::forbidden(format!(
                "entity {} has not completed KYC verification",
                instance.entity_id
            )));
        }

        if let Some(entity_type) = request.payload.get("entity_type").and_then(|v| v.as_str()) {
            self.schemas.validate(entity_type, request.payload.clone())?;
        }

        let mut approval_request_id = None;
        if let Some(amount) = request.payload.get("amount").and_then(|v| v.as_f64()) {
            let ctx = TransactionContext {
                txn_id: format!("{}-{}", workflow_id, instance.history.len()),
                entity_id: Some(instance.entity_id.clone()),
                amount,
                currency: request
                    .payload
                    .get("currency")
                    .and_then(|v| v.as_str())
                    .unwrap_or("USD")
                    .to_string(),
                timestamp: Utc::now(),
                metadata: request.payload.clone(),
            };

            let validation = self.governance.validate_transaction(&ctx).await?;
            if !validation.allowed {
                self.audit
                    .log_state_transition(workflow_id, &instance.current_state, "governance-denied", EventOutcome::Failure)
                    .await?;
                let violations_json = serde_json::to_value(&validation.violations)?;
                return Err(Error::policy_violation("transaction violates governance limits", violations_json));
            }
            if validation.requires_approval {
                approval_request_id = validation.approval_request_id.clone();
            }
            self.governance.record_transaction(&ctx);
        }

        if let Some(approval_request_id) = approval_request_id {
            instance.parked_target = Some(to_state.to_string());
            let from_state = instance.current_state.clone();
            let transition = StateTransition {
                from: from_state.clone(),
                to: "awaiting_approval".to_string(),
                actor: request.actor.clone(),
                reason: request.reason.clone(),
                timestamp: Utc::now(),
                approval_request_id: Some(approval_request_id.clone()),
            };
            instance.current_state = "awaiting_approval".to_string();
            instance.history.push(transition);
            self.audit
                .log_state_transition(workflow_id, &from_state, "awaiting_approval", EventOutcome::Pending)
                .await?;
            return Ok(AdvanceOutcome::Parked { approval_request_id });
        }

        self.run_side_effects(instance, workflow_id, &request).await?;
        let latency_ms = node_started.elapsed().as_millis() as u64;
        self.commit_transition(instance, workflow_id, to_state, &request, None, latency_ms).await
    }

    async fn resolve_approval_event(
        &self,
        instance: &mut WorkflowInstance,
        workflow_id: &str,
        request: &AdvanceRequest,
    ) -> Result<AdvanceOutcome> {
        if instance.current_state != "awaiting_approval" {
            return Err(Error::validation(format!(
                "{} is only valid from 'awaiting_approval', instance is '{}'",
                request.event, instance.current_state
            )));
        }

        let to_state = if request.event == "approval.granted" {
            instance
                .parked_target
                .clone()
                .ok_or_else(|| Error::internal("no parked target recorded for an approval-granted resume"))?
        } else {
            "denied".to_string()
        };
        instance.parked_target = None;

        // Approval resolution carries no decision node (§4.8), so there is no
        // decision-node latency to measure here.
        self.commit_transition(instance, workflow_id, &to_state, request, None, 0).await
    }

    async fn commit_escalation(
        &self,
        instance: &mut WorkflowInstance,
        workflow_id: &str,
        request: &AdvanceRequest,
    ) -> Result<AdvanceOutcome> {
        let from_state = instance.current_state.clone();
        let transition = StateTransition {
            from: from_state.clone(),
            to: "escalated".to_string(),
            actor: request.actor.clone(),
            reason: request.reason.clone(),
            timestamp: Utc::now(),
            approval_request_id: None,
        };
        instance.current_state = "escalated".to_string();
        instance.history.push(transition);

        let event = AuditEvent::builder(
            EventType::Escalation,
            "escalate",
            format!("workflow {} escalated from {} to {}", workflow_id, from_state, request.reason),
        )
        .severity(EventSeverity::Critical)
        .workflow_id(workflow_id)
        .actor_id(request.actor.clone())
        .metadata("escalation_target", json!(request.reason))
        .result(EventOutcome::Success)
        .build();
        self.audit.log_event(event).await?;

        Ok(AdvanceOutcome::Escalated)
    }

    /// The only edge with an internal retry loop: repeatedly invokes the
    /// submission adapter, logging a `submission-attempt` decision event per
    /// try, until it succeeds (`confirmed`) or exhausts `max_submission_attempts`
    /// (`failed`). Neither outcome is retried further by the caller.
    async fn handle_submission(
        &self,
        instance: &mut WorkflowInstance,
        workflow_id: &str,
        request: &AdvanceRequest,
    ) -> Result<AdvanceOutcome> {
        if instance.current_state != "submitted" {
            return Err(Error::validation(format!(
                "attempt_submission is only valid from 'submitted', instance is '{}'",
                instance.current_state
            )));
        }

        let mut attempts = 0u32;
        let mut backoff = self.submission_backoff;
        let overall_started = Instant::now();

        loop {
            attempts += 1;
            let attempt_started = Instant::now();
            let outcome = match &self.submission_adapter {
                Some(adapter) => adapter.submit(instance).await,
                None => Ok(()),
            };
            let attempt_latency_ms = attempt_started.elapsed().as_millis() as u64;
            let success = outcome.is_ok();

            self.telemetry
                .log_event(DecisionEvent::new(
                    "submission-attempt",
                    instance.entity_id.clone(),
                    attempt_latency_ms,
                    success,
                ))
                .await;

            match outcome {
                Ok(()) => break,
                Err(_) if attempts < self.max_submission_attempts => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(_) => {
                    return self.commit_transition(instance, workflow_id, "failed", request, None, 0).await;
                }
            }
        }

        let total_latency_ms = overall_started.elapsed().as_millis() as u64;
        self.telemetry
            .log_event(DecisionEvent::new("confirmation-received", instance.entity_id.clone(), total_latency_ms, true))
            .await;
        self.commit_transition(instance, workflow_id, "confirmed", request, None, 0).await
    }

    /// Side effects executed once guards pass and before the transition is
    /// committed: vault credential resolution (C1) and, when the payload asks
    /// for it, a notification dispatch (C9). Neither aborts the transition on
    /// failure — the chain records their outcome so operators can compensate.
    async fn run_side_effects(
        &self,
        instance: &WorkflowInstance,
        workflow_id: &str,
        request: &AdvanceRequest,
    ) -> Result<()> {
        let credential_id = format!("workflow:{}", instance.entity_id);
        match self.vault.get(&credential_id).await {
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::ResourceNotFound => {}
            Err(e) => return Err(e),
        }

        if let Some(recipient) = request.payload.get("notify").and_then(|v| v.as_str()) {
            let message = NotificationMessage {
                channel: Channel::Email,
                recipient: recipient.to_string(),
                subject: Some(format!("workflow {} update", workflow_id)),
                body: request.reason.clone(),
                severity: EventSeverity::Info,
                metadata: json!({ "event": request.event }),
            };
            let _ = self.notifications.send(message, Some(workflow_id)).await;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_transition(
        &self,
        instance: &mut WorkflowInstance,
        workflow_id: &str,
        to_state: &str,
        request: &AdvanceRequest,
        approval_request_id: Option<String>,
        latency_ms: u64,
    ) -> Result<AdvanceOutcome> {
        let from_state = instance.current_state.clone();
        let transition = StateTransition {
            from: from_state.clone(),
            to: to_state.to_string(),
            actor: request.actor.clone(),
            reason: request.reason.clone(),
            timestamp: Utc::now(),
            approval_request_id,
        };
        instance.current_state = to_state.to_string();
        instance.history.push(transition);
        if is_terminal(to_state) {
            instance.closed_at = Some(Utc::now());
        }

        self.audit
            .log_state_transition(workflow_id, &from_state, to_state, EventOutcome::Success)
            .await?;

        if let Some(decision) = decision_node_for(&request.event) {
            self.telemetry
                .log_event(DecisionEvent::new(decision, instance.entity_id.clone(), latency_ms, true))
                .await;

            let slo_report = self.telemetry.check_slo_compliance_for(decision).await;
            if !slo_report.violated.is_empty() {
                warn!(
                    workflow_id,
                    decision,
                    violated = ?slo_report.violated,
                    "SLO violation detected after decision node"
                );
            }
        }

        Ok(AdvanceOutcome::Committed { to_state: to_state.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factbox::{Entity, KycStatus};
    use crate::governance::{AnomalyConfig, RateLimit, SpendingLimits};
    use occam_core::config::{SecurityConfig, SloConfig, TelemetryConfig};
    use occam_core::error::ErrorMetrics;
    use occam_core::telemetry::{MetricsRegistry, SloTargets};

    fn test_telemetry_config() -> TelemetryConfig {
        TelemetryConfig {
            metrics_enabled: true,
            metrics_port: 9090,
            metrics_path: "/metrics".to_string(),
            metrics_namespace: "occam_test".to_string(),
            slo: SloConfig {
                retrieval_latency_ms: 500.0,
                build_time_secs: 60.0,
                compliance_accuracy: 0.99,
                audit_trace_verification: 1.0,
                cpu_percent: 80.0,
                memory_percent: 80.0,
            },
        }
    }

    fn test_orchestrator() -> WorkflowOrchestrator {
        let backend = Arc::new(occam_core::audit::InMemoryAuditBackend::new());
        let audit = Arc::new(AuditLogger::new(backend, Arc::new(ErrorMetrics::new())));
        let telemetry = Arc::new(TelemetryService::new(
            MetricsRegistry::new(test_telemetry_config()),
            SloTargets::default(),
        ));
        let vault = Arc::new(
            SecureVault::new(&SecurityConfig {
                aes_encryption_key: "01234567890123456789012345678901".to_string(),
            })
            .unwrap(),
        );
        let factbox = Arc::new(FactBox::new());
        let governance = Arc::new(GovernanceEngine::new(
            audit.clone(),
            SpendingLimits { max_txn_amount: 100_000.0, approval_threshold: 5_000.0, daily_limit: 200_000.0, currency: "USD".to_string() },
            RateLimit { window_seconds: 60, max_txns_per_window: 50 },
            AnomalyConfig { unusual_amount_multiplier: 5.0, rapid_count: 10, rapid_window_seconds: 30 },
        ));
        let mut enabled = std::collections::HashMap::new();
        enabled.insert(Channel::Email, true);
        let notifications = Arc::new(NotificationDispatcher::new(
            vault.clone(),
            audit.clone(),
            crate::notification::NotificationConfig {
                enabled_channels: enabled,
                max_attempts: 1,
                initial_backoff: StdDuration::from_millis(1),
            },
            "workflow-notifications",
        ));
        let schemas = Arc::new(SchemaRegistry::new());

        WorkflowOrchestrator::new(audit, telemetry, vault, factbox, governance, notifications, schemas)
    }

    fn request(event: &str, payload: serde_json::Value) -> AdvanceRequest {
        AdvanceRequest {
            event: event.to_string(),
            actor: "officer-1".to_string(),
            reason: "routine advance".to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn happy_path_without_approval_walks_to_closed() {
        let orch = test_orchestrator();
        let instance = orch.create("acme", "policy-1", semver::Version::new(1, 0, 0));

        orch.advance(&instance.id, request("ingest", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("validate", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("generate_form", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("process_payment", json!({ "amount": 100.0 }))).await.unwrap();
        orch.advance(&instance.id, request("attempt_submission", json!({}))).await.unwrap();
        let outcome = orch.advance(&instance.id, request("close", json!({}))).await.unwrap();

        match outcome {
            AdvanceOutcome::Committed { to_state } => assert_eq!(to_state, "closed"),
            other => panic!("expected Committed, got {:?}", other),
        }

        let status = orch.status(&instance.id).await.unwrap();
        assert_eq!(status.current_state, "closed");
        assert!(status.closed_at.is_some());
        assert_eq!(status.history.len(), 6);
    }

    #[tokio::test]
    async fn large_amount_parks_and_resumes_on_approval() {
        let orch = test_orchestrator();
        let instance = orch.create("acme", "policy-1", semver::Version::new(1, 0, 0));

        orch.advance(&instance.id, request("ingest", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("validate", json!({}))).await.unwrap();
        let outcome = orch
            .advance(&instance.id, request("generate_form", json!({ "amount": 9_000.0 })))
            .await
            .unwrap();

        let approval_request_id = match outcome {
            AdvanceOutcome::Parked { approval_request_id } => approval_request_id,
            other => panic!("expected Parked, got {:?}", other),
        };

        let status = orch.status(&instance.id).await.unwrap();
        assert_eq!(status.current_state, "awaiting_approval");

        orch.governance
            .process_approval(&approval_request_id, "compliance-officer-1", crate::governance::ApprovalDecision::Approve, None)
            .await
            .unwrap();

        let outcome = orch
            .advance(&instance.id, request("approval.granted", json!({})))
            .await
            .unwrap();
        match outcome {
            AdvanceOutcome::Committed { to_state } => assert_eq!(to_state, "approved"),
            other => panic!("expected Committed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unverified_kyc_blocks_advance() {
        let orch = test_orchestrator();
        orch.factbox.upsert_entity(Entity {
            entity_id: "acme".to_string(),
            kind: "business".to_string(),
            kyc_status: KycStatus::Pending,
            registrations: vec![],
        });
        let instance = orch.create("acme", "policy-1", semver::Version::new(1, 0, 0));

        let err = orch.advance(&instance.id, request("ingest", json!({}))).await.unwrap_err();
        assert_eq!(err.code, occam_core::ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn escalate_is_reachable_from_any_non_terminal_state() {
        let orch = test_orchestrator();
        let instance = orch.create("acme", "policy-1", semver::Version::new(1, 0, 0));

        let outcome = orch.escalate(&instance.id, "officer-1", "fraud-team").await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Escalated));

        let status = orch.status(&instance.id).await.unwrap();
        assert_eq!(status.current_state, "escalated");
    }

    #[tokio::test]
    async fn closed_workflow_rejects_further_advances() {
        let orch = test_orchestrator();
        let instance = orch.create("acme", "policy-1", semver::Version::new(1, 0, 0));

        orch.advance(&instance.id, request("ingest", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("validate", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("generate_form", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("process_payment", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("attempt_submission", json!({}))).await.unwrap();
        orch.advance(&instance.id, request("close", json!({}))).await.unwrap();

        let err = orch.advance(&instance.id, request("escalate", json!({}))).await.unwrap_err();
        assert_eq!(err.code, occam_core::ErrorCode::Conflict);
    }
}
