use super::chain::ChainVerification;
use super::AuditEvent;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Append-only backend for the audit chain. Implementations never expose
/// deletion or mutation of stored events — only `store_event` (append),
/// `retrieve_events` (read), and `verify` (recompute).
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Append an event. The backend is responsible for assigning `prev_hash`
    /// and `hash` by chaining off its current tail before persisting.
    async fn store_event(&self, event: AuditEvent) -> Result<AuditEvent>;

    /// Retrieve audit events matching `filter`, timestamp-sorted descending.
    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;

    /// Count audit events matching `filter`.
    async fn count_events(&self, filter: &AuditFilter) -> Result<u64>;

    /// Recompute hashes over `[from_index, to_index)` (defaults to the whole
    /// chain) and report the first index where the chain breaks, if any.
    async fn verify(&self, from_index: Option<usize>, to_index: Option<usize>) -> Result<ChainVerification>;

    /// Health check for the backend.
    async fn health_check(&self) -> Result<BackendHealth>;
}

/// Health status of an audit backend.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub is_healthy: bool,
    pub message: Option<String>,
    pub last_write: Option<DateTime<Utc>>,
    pub events_stored: u64,
}

/// Filter for querying audit events by `entityId`, `workflowId`, `eventType`,
/// `severity`, and time range.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub actor_id: Option<String>,
    pub workflow_id: Option<String>,
    pub entity_id: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub severities: Option<Vec<String>>,
    pub results: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Trait for types that can be audited.
pub trait Auditable {
    fn resource_type() -> &'static str;
    fn resource_id(&self) -> String;
    fn to_audit_json(&self) -> Value;
}

/// Builder for audit filters.
#[derive(Default)]
pub struct AuditFilterBuilder {
    filter: AuditFilter,
}

impl AuditFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.filter.start_time = Some(start);
        self.filter.end_time = Some(end);
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.filter.actor_id = Some(actor_id.into());
        self
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.filter.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.filter.entity_id = Some(entity_id.into());
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.filter.event_types = Some(event_types);
        self
    }

    pub fn severities(mut self, severities: Vec<String>) -> Self {
        self.filter.severities = Some(severities);
        self
    }

    pub fn results(mut self, results: Vec<String>) -> Self {
        self.filter.results = Some(results);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.filter.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.filter.offset = Some(offset);
        self
    }

    pub fn build(self) -> AuditFilter {
        self.filter
    }
}

impl AuditFilter {
    pub fn builder() -> AuditFilterBuilder {
        AuditFilterBuilder::new()
    }
}
