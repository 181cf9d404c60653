use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity levels for audit events: `{info, warning, high, critical}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    High,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::High => "high",
            EventSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Event types produced by the kernel's components. `Custom` covers anything
/// not named here so callers are never blocked on an enum change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    // Workflow decision nodes (§4.8)
    DataIngestion,
    ValidationCheck,
    FormGeneration,
    PaymentProcessing,
    SubmissionAttempt,
    ConfirmationReceived,

    // Workflow lifecycle
    StateTransition,
    Escalation,
    Cancellation,

    // Governance
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ApprovalExpired,
    AnomalyDetected,
    ConfigurationChanged,

    // Vault
    VaultStore,
    VaultAccess,
    VaultRotation,
    VaultIntegrityViolation,

    // Notification
    NotificationSent,

    // Custom events for extensions
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Custom(name) => write!(f, "custom.{}", name),
            other => {
                let json = serde_json::to_value(other).unwrap_or(serde_json::Value::Null);
                write!(f, "{}", json.as_str().unwrap_or("unknown"))
            }
        }
    }
}

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Failure,
    Pending,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Success => write!(f, "success"),
            EventOutcome::Failure => write!(f, "failure"),
            EventOutcome::Pending => write!(f, "pending"),
        }
    }
}

/// A single link in the hash chain. `hash` and `prev_hash` are populated by
/// the backend at append time (see [`crate::audit::chain`]); builders never
/// set them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    /// Hash of the previous event in the chain; 32 zero bytes (hex) for the genesis event.
    pub prev_hash: String,
    /// `SHA-256(prev_hash || canonical(event_without_hash))`, hex-encoded. Empty until appended.
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub actor_id: Option<String>,
    pub workflow_id: Option<String>,
    pub entity_id: Option<String>,
    pub action: String,
    pub description: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub result: EventOutcome,
    pub error_message: Option<String>,
}

/// Builder for creating audit events prior to chaining.
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(event_type: EventType, action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            event: AuditEvent {
                event_id: Uuid::new_v4().to_string(),
                prev_hash: String::new(),
                hash: String::new(),
                timestamp: Utc::now(),
                trace_id: Uuid::new_v4().to_string(),
                event_type,
                severity: EventSeverity::Info,
                actor_id: None,
                workflow_id: None,
                entity_id: None,
                action: action.into(),
                description: description.into(),
                metadata: HashMap::new(),
                result: EventOutcome::Success,
                error_message: None,
            },
        }
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.event.actor_id = Some(actor_id.into());
        self
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.event.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.event.entity_id = Some(entity_id.into());
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.event.trace_id = trace_id.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.event.metadata.insert(key.into(), value);
        self
    }

    pub fn result(mut self, result: EventOutcome) -> Self {
        self.event.result = result;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.event.error_message = Some(message.into());
        self.event.result = EventOutcome::Failure;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

impl AuditEvent {
    pub fn builder(
        event_type: EventType,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type, action, description)
    }

    pub fn should_alert(&self) -> bool {
        matches!(self.severity, EventSeverity::Critical)
            || matches!(self.result, EventOutcome::Failure)
    }
}
