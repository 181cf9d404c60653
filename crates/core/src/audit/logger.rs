use super::{
    event::{AuditEvent, EventOutcome, EventSeverity, EventType},
    traits::AuditBackend,
};
use crate::error::{Error, ErrorCode, ErrorMetrics, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// High-level audit logger providing convenient methods for the event
/// families each kernel component emits. Wraps an [`AuditBackend`] so the
/// chain-linking storage detail never leaks into callers.
#[derive(Clone)]
pub struct AuditLogger {
    backend: Arc<dyn AuditBackend>,
    error_metrics: Arc<ErrorMetrics>,
    context: Arc<RwLock<AuditContext>>,
}

/// Context that persists across audit operations in a request/workflow run,
/// applied to any event field the caller left unset.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub actor_id: Option<String>,
    pub workflow_id: Option<String>,
    pub trace_id: Option<String>,
}

impl AuditLogger {
    pub fn new(backend: Arc<dyn AuditBackend>, error_metrics: Arc<ErrorMetrics>) -> Self {
        Self {
            backend,
            error_metrics,
            context: Arc::new(RwLock::new(AuditContext::default())),
        }
    }

    pub async fn set_context(&self, context: AuditContext) {
        let mut ctx = self.context.write().await;
        *ctx = context;
    }

    pub async fn update_context<F>(&self, updater: F)
    where
        F: FnOnce(&mut AuditContext),
    {
        let mut ctx = self.context.write().await;
        updater(&mut ctx);
    }

    /// Log any event. Unset `actor_id`/`workflow_id`/`trace_id` are filled
    /// from the ambient context; the stamped, chain-linked event is returned
    /// so callers can surface its `event_id`/`hash`.
    pub async fn log_event(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        {
            let ctx = self.context.read().await;
            if event.actor_id.is_none() {
                event.actor_id = ctx.actor_id.clone();
            }
            if event.workflow_id.is_none() {
                event.workflow_id = ctx.workflow_id.clone();
            }
            if let Some(ref trace_id) = ctx.trace_id {
                if event.trace_id.is_empty() {
                    event.trace_id = trace_id.clone();
                }
            }
        }

        match event.severity {
            EventSeverity::Info => {
                info!(
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    workflow_id = ?event.workflow_id,
                    action = %event.action,
                    "audit event"
                );
            }
            EventSeverity::Warning => {
                warn!(
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    workflow_id = ?event.workflow_id,
                    action = %event.action,
                    "audit event (warning)"
                );
            }
            EventSeverity::High | EventSeverity::Critical => {
                error!(
                    event_type = %event.event_type,
                    actor_id = ?event.actor_id,
                    workflow_id = ?event.workflow_id,
                    action = %event.action,
                    metadata = ?event.metadata,
                    "audit event ({})", event.severity
                );
            }
        }

        match self.backend.store_event(event.clone()).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                let audit_error = Error::new(
                    ErrorCode::StorageError,
                    format!("failed to store audit event: {}", e),
                );
                self.error_metrics.record_error(&audit_error).await;
                error!(
                    event_type = %event.event_type,
                    error = %e,
                    "failed to append audit event to the chain"
                );
                Err(e)
            }
        }
    }

    /// Log a workflow lifecycle transition (§4.8): info severity unless the
    /// transition itself failed.
    pub async fn log_state_transition(
        &self,
        workflow_id: impl Into<String>,
        from_state: &str,
        to_state: &str,
        outcome: EventOutcome,
    ) -> Result<AuditEvent> {
        let workflow_id = workflow_id.into();
        let severity = if outcome == EventOutcome::Failure {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };

        let event = AuditEvent::builder(
            EventType::StateTransition,
            "advance",
            format!("{} -> {}", from_state, to_state),
        )
        .severity(severity)
        .workflow_id(workflow_id)
        .metadata("from_state", serde_json::json!(from_state))
        .metadata("to_state", serde_json::json!(to_state))
        .result(outcome)
        .build();

        self.log_event(event).await
    }

    /// Log a governance approval decision: grants are info, denials are
    /// warning (§4.2 — "denials are first-class, logged events").
    pub async fn log_approval(
        &self,
        approval_request_id: impl Into<String>,
        workflow_id: impl Into<String>,
        approver_id: impl Into<String>,
        granted: bool,
        reason: Option<&str>,
    ) -> Result<AuditEvent> {
        let event_type = if granted {
            EventType::ApprovalGranted
        } else {
            EventType::ApprovalDenied
        };
        let severity = if granted { EventSeverity::Info } else { EventSeverity::Warning };
        let approval_request_id = approval_request_id.into();

        let mut builder = AuditEvent::builder(
            event_type,
            if granted { "grant" } else { "deny" },
            format!("approval request {}", approval_request_id),
        )
        .severity(severity)
        .workflow_id(workflow_id)
        .actor_id(approver_id)
        .metadata("approval_request_id", serde_json::json!(approval_request_id))
        .result(if granted { EventOutcome::Success } else { EventOutcome::Failure });

        if let Some(reason) = reason {
            builder = builder.metadata("reason", serde_json::json!(reason));
        }

        self.log_event(builder.build()).await
    }

    /// Log a telemetry-surfaced anomaly/drift detection as a critical,
    /// alerting audit event (§4.3, §7).
    pub async fn log_anomaly(
        &self,
        workflow_id: Option<String>,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<AuditEvent> {
        let mut builder = AuditEvent::builder(EventType::AnomalyDetected, "detect", description)
            .severity(EventSeverity::Critical)
            .metadata("detail", metadata)
            .result(EventOutcome::Failure);

        if let Some(workflow_id) = workflow_id {
            builder = builder.workflow_id(workflow_id);
        }

        self.log_event(builder.build()).await
    }

    /// Log a dispatched notification (§4.9): info on success, warning once a
    /// channel has exhausted its retry budget.
    pub async fn log_notification(
        &self,
        workflow_id: impl Into<String>,
        channel: &str,
        recipient: &str,
        outcome: EventOutcome,
    ) -> Result<AuditEvent> {
        let severity = if outcome == EventOutcome::Failure {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };

        let event = AuditEvent::builder(
            EventType::NotificationSent,
            "dispatch",
            format!("{} notification to {}", channel, recipient),
        )
        .severity(severity)
        .workflow_id(workflow_id)
        .metadata("channel", serde_json::json!(channel))
        .metadata("recipient", serde_json::json!(recipient))
        .result(outcome)
        .build();

        self.log_event(event).await
    }

    /// Log a vault tamper/integrity failure. Always critical; the only
    /// [`ErrorCode`] family treated as fatal to the kernel (§7).
    pub async fn log_integrity_violation(
        &self,
        entity_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<AuditEvent> {
        let event = AuditEvent::builder(EventType::VaultIntegrityViolation, "verify", description)
            .severity(EventSeverity::Critical)
            .entity_id(entity_id)
            .result(EventOutcome::Failure)
            .build();

        self.log_event(event).await
    }
}

impl AuditContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::repository::InMemoryAuditBackend;
    use crate::error::ErrorMetrics;

    fn logger() -> AuditLogger {
        AuditLogger::new(Arc::new(InMemoryAuditBackend::new()), Arc::new(ErrorMetrics::new()))
    }

    #[tokio::test]
    async fn state_transition_failure_is_logged_as_warning() {
        let logger = logger();
        let event = logger
            .log_state_transition("wf-1", "draft", "pending_review", EventOutcome::Failure)
            .await
            .unwrap();
        assert_eq!(event.severity, EventSeverity::Warning);
        assert!(!event.hash.is_empty());
    }

    #[tokio::test]
    async fn denied_approval_is_warning_not_critical() {
        let logger = logger();
        let event = logger
            .log_approval("req-1", "wf-1", "approver-1", false, Some("limit exceeded"))
            .await
            .unwrap();
        assert_eq!(event.severity, EventSeverity::Warning);
        assert_eq!(event.result, EventOutcome::Failure);
    }

    #[tokio::test]
    async fn context_fills_unset_actor_and_workflow() {
        let logger = logger();
        logger
            .set_context(AuditContext::new().with_actor_id("svc-account").with_workflow_id("wf-9"))
            .await;

        let event = AuditEvent::builder(EventType::ConfigurationChanged, "update", "test").build();
        let stored = logger.log_event(event).await.unwrap();
        assert_eq!(stored.actor_id.as_deref(), Some("svc-account"));
        assert_eq!(stored.workflow_id.as_deref(), Some("wf-9"));
    }
}
