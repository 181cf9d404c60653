//! FactBox (C6), Governance Engine (C7), Workflow Orchestrator (C8), and
//! Notification Dispatcher (C9): the transaction-facing half of the kernel
//! built on top of the vault, audit, telemetry, and ontology primitives in
//! `occam-core` and `occam-ontology`.

pub mod factbox;
pub mod governance;
pub mod notification;
pub mod workflow;

pub use factbox::{Entity, FactBox, KycStatus, Registration, RegistrationStatus};
pub use governance::{
    AnomalyConfig, ApprovalDecision, ApprovalRequest, ApprovalStatus, GovernanceEngine, RateLimit,
    SpendingLimits, TransactionContext, ValidationResult, Violation, ViolationSeverity,
};
pub use notification::{
    Channel, ChannelAdapter, DeliveryResult, DeliveryStatus, LoggingChannelAdapter, NotificationConfig,
    NotificationDispatcher, NotificationMessage,
};
pub use workflow::{
    AdvanceOutcome, AdvanceRequest, StateTransition, SubmissionAdapter, WorkflowInstance, WorkflowOrchestrator,
};
