//! Transaction validation, spending limits, and approval workflow (C7, §4.7).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use occam_core::audit::{AuditEvent, EventOutcome, EventSeverity, EventType};
use occam_core::error::{Error, Result};
use occam_core::AuditLogger;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingLimits {
    pub max_txn_amount: f64,
    pub approval_threshold: f64,
    pub daily_limit: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub window_seconds: u32,
    pub max_txns_per_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub unusual_amount_multiplier: f64,
    pub rapid_count: u32,
    pub rapid_window_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContext {
    pub txn_id: String,
    pub entity_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub blocking: bool,
    pub severity: ViolationSeverity,
    pub message: String,
}

impl Violation {
    fn blocking(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            blocking: true,
            severity: ViolationSeverity::High,
            message: message.into(),
        }
    }

    fn anomaly(code: &str, severity: ViolationSeverity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            blocking: false,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub allowed: bool,
    pub requires_approval: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub approval_request_id: Option<String>,
}

#[derive(Debug, Clone)]
struct TransactionRecord {
    amount: f64,
    timestamp: DateTime<Utc>,
}

const DEFAULT_APPROVAL_TTL_HOURS: i64 = 24;

fn entity_key(ctx: &TransactionContext) -> String {
    ctx.entity_id.clone().unwrap_or_else(|| "global".to_string())
}

/// Evaluates transactions against spending limits, rate limits, and anomaly
/// heuristics, and tracks the approval requests those evaluations produce.
/// Transaction history and approval state are each keyed and locked
/// independently so unrelated entities never contend (§5).
pub struct GovernanceEngine {
    audit: Arc<AuditLogger>,
    limits: RwLock<SpendingLimits>,
    rate_limit: RwLock<RateLimit>,
    anomaly_config: RwLock<AnomalyConfig>,
    history: DashMap<String, Vec<TransactionRecord>>,
    approvals: DashMap<String, ApprovalRequest>,
}

impl GovernanceEngine {
    pub fn new(
        audit: Arc<AuditLogger>,
        limits: SpendingLimits,
        rate_limit: RateLimit,
        anomaly_config: AnomalyConfig,
    ) -> Self {
        Self {
            audit,
            limits: RwLock::new(limits),
            rate_limit: RwLock::new(rate_limit),
            anomaly_config: RwLock::new(anomaly_config),
            history: DashMap::new(),
            approvals: DashMap::new(),
        }
    }

    /// Runs the full evaluation order from §4.7. All checks are collected
    /// rather than short-circuited, so a caller always sees every violation
    /// a transaction triggered.
    pub async fn validate_transaction(&self, ctx: &TransactionContext) -> Result<ValidationResult> {
        let limits = self.limits.read().await.clone();
        let rate_limit = self.rate_limit.read().await.clone();
        let anomaly_config = self.anomaly_config.read().await.clone();

        let key = entity_key(ctx);
        let history = self
            .history
            .get(&key)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut requires_approval = false;

        // 1. Absolute cap.
        if ctx.amount > limits.max_txn_amount {
            violations.push(Violation::blocking(
                "spending-limit-max",
                format!("amount {} exceeds max transaction amount {}", ctx.amount, limits.max_txn_amount),
            ));
        }

        // 2. Approval threshold.
        if ctx.amount >= limits.approval_threshold {
            requires_approval = true;
        }

        // 3. Daily cap.
        let today_total: f64 = history
            .iter()
            .filter(|t| t.timestamp.date_naive() == ctx.timestamp.date_naive())
            .map(|t| t.amount)
            .sum();
        if today_total + ctx.amount > limits.daily_limit {
            violations.push(Violation::blocking(
                "spending-limit-daily",
                format!("today's total {} plus amount {} exceeds daily limit {}", today_total, ctx.amount, limits.daily_limit),
            ));
        }

        // 4. Rate limit.
        let window_start = ctx.timestamp - Duration::seconds(rate_limit.window_seconds as i64);
        let recent_count = history.iter().filter(|t| t.timestamp >= window_start).count() as u32;
        if recent_count >= rate_limit.max_txns_per_window {
            violations.push(Violation::blocking(
                "rate-limit",
                format!("{} transactions in the last {}s reached the limit of {}", recent_count, rate_limit.window_seconds, rate_limit.max_txns_per_window),
            ));
        }

        // 5a. Unusual amount.
        if !history.is_empty() {
            let avg = history.iter().map(|t| t.amount).sum::<f64>() / history.len() as f64;
            if avg > 0.0 {
                if ctx.amount > avg * anomaly_config.unusual_amount_multiplier * 5.0 {
                    violations.push(Violation::anomaly(
                        "unusual-amount",
                        ViolationSeverity::High,
                        format!("amount {} is far above the historical average {}", ctx.amount, avg),
                    ));
                    requires_approval = true;
                } else if ctx.amount > avg * anomaly_config.unusual_amount_multiplier {
                    violations.push(Violation::anomaly(
                        "unusual-amount",
                        ViolationSeverity::Medium,
                        format!("amount {} is above the historical average {}", ctx.amount, avg),
                    ));
                    warnings.push("amount is higher than this entity's historical average".to_string());
                }
            }
        }

        // 5b. Rapid transactions.
        let rapid_window_start = ctx.timestamp - Duration::seconds(anomaly_config.rapid_window_seconds as i64);
        let rapid_count = history.iter().filter(|t| t.timestamp >= rapid_window_start).count() as u32;
        if rapid_count >= anomaly_config.rapid_count {
            violations.push(Violation::anomaly(
                "rapid-transactions",
                ViolationSeverity::High,
                format!("{} transactions within {}s", rapid_count, anomaly_config.rapid_window_seconds),
            ));
            requires_approval = true;
        }

        // 5c. Duplicate.
        let dup_window_start = ctx.timestamp - Duration::minutes(5);
        let is_duplicate = history
            .iter()
            .any(|t| (t.amount - ctx.amount).abs() < f64::EPSILON && t.timestamp >= dup_window_start);
        if is_duplicate {
            violations.push(Violation::anomaly(
                "duplicate-transaction",
                ViolationSeverity::Medium,
                format!("amount {} duplicates a transaction within the last 5 minutes", ctx.amount),
            ));
        }

        let blocking = violations.iter().any(|v| v.blocking);
        let allowed = !blocking;

        let mut approval_request_id = None;
        if requires_approval && !blocking {
            let now = Utc::now();
            let request = ApprovalRequest {
                id: Uuid::new_v4().to_string(),
                transaction_id: ctx.txn_id.clone(),
                amount: ctx.amount,
                currency: ctx.currency.clone(),
                requested_by: key.clone(),
                requested_at: now,
                expires_at: now + Duration::hours(DEFAULT_APPROVAL_TTL_HOURS),
                status: ApprovalStatus::Pending,
                approver: None,
                decided_at: None,
                reason: None,
            };
            approval_request_id = Some(request.id.clone());

            let event = AuditEvent::builder(
                EventType::ApprovalRequested,
                "request",
                format!("approval requested for transaction {}", ctx.txn_id),
            )
            .severity(EventSeverity::Info)
            .entity_id(key.clone())
            .metadata("approval_request_id", json!(request.id))
            .metadata("amount", json!(ctx.amount))
            .result(EventOutcome::Pending)
            .build();
            self.audit.log_event(event).await?;

            self.approvals.insert(request.id.clone(), request);
        }

        Ok(ValidationResult {
            allowed,
            requires_approval,
            violations,
            warnings,
            approval_request_id,
        })
    }

    /// Appends `ctx` to the entity's transaction history used by future
    /// evaluations. Distinct from `validate_transaction` so callers only
    /// record transactions that actually executed.
    pub fn record_transaction(&self, ctx: &TransactionContext) {
        let key = entity_key(ctx);
        self.history.entry(key).or_default().push(TransactionRecord {
            amount: ctx.amount,
            timestamp: ctx.timestamp,
        });
    }

    /// Resolves a pending approval. Lazily transitions a past-due request to
    /// `expired` before checking whether it's still decidable, per §3.4.
    pub async fn process_approval(
        &self,
        request_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        let now = Utc::now();

        let (already_settled, just_expired, status) = {
            let mut entry = self
                .approvals
                .get_mut(request_id)
                .ok_or_else(|| Error::not_found(format!("approval request {} not found", request_id)))?;

            let just_expired = entry.status == ApprovalStatus::Pending && now > entry.expires_at;
            if just_expired {
                entry.status = ApprovalStatus::Expired;
            }

            if entry.status != ApprovalStatus::Pending {
                (true, just_expired, entry.status)
            } else {
                entry.status = match decision {
                    ApprovalDecision::Approve => ApprovalStatus::Approved,
                    ApprovalDecision::Deny => ApprovalStatus::Denied,
                };
                entry.approver = Some(approver.to_string());
                entry.decided_at = Some(now);
                entry.reason = reason.clone();
                (false, false, entry.status)
            }
        };

        if just_expired {
            let event = AuditEvent::builder(
                EventType::ApprovalExpired,
                "expire",
                format!("approval request {} expired before a decision was recorded", request_id),
            )
            .severity(EventSeverity::Warning)
            .metadata("approval_request_id", json!(request_id))
            .result(EventOutcome::Failure)
            .build();
            self.audit.log_event(event).await?;
        }

        if already_settled {
            return Err(Error::conflict(format!(
                "approval request {} is already {:?}",
                request_id, status
            )));
        }

        let updated = self
            .approvals
            .get(request_id)
            .map(|e| e.value().clone())
            .expect("just written above");

        self.audit
            .log_approval(
                request_id,
                updated.transaction_id.clone(),
                approver,
                decision == ApprovalDecision::Approve,
                reason.as_deref(),
            )
            .await?;

        Ok(updated)
    }

    pub fn get_approval(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.approvals.get(request_id).map(|e| e.value().clone())
    }

    pub async fn update_limits(&self, actor: &str, limits: SpendingLimits) -> Result<()> {
        *self.limits.write().await = limits;
        self.audit_configuration_changed(actor, "spending-limits").await
    }

    pub async fn update_rate_limit(&self, actor: &str, rate_limit: RateLimit) -> Result<()> {
        *self.rate_limit.write().await = rate_limit;
        self.audit_configuration_changed(actor, "rate-limit").await
    }

    pub async fn update_anomaly_config(&self, actor: &str, config: AnomalyConfig) -> Result<()> {
        *self.anomaly_config.write().await = config;
        self.audit_configuration_changed(actor, "anomaly-config").await
    }

    async fn audit_configuration_changed(&self, actor: &str, which: &str) -> Result<()> {
        let event = AuditEvent::builder(
            EventType::ConfigurationChanged,
            "update",
            format!("{} configuration updated", which),
        )
        .severity(EventSeverity::Info)
        .actor_id(actor)
        .metadata("config", json!(which))
        .build();
        self.audit.log_event(event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occam_core::error::ErrorMetrics;
    use occam_core::audit::InMemoryAuditBackend;

    fn test_engine() -> GovernanceEngine {
        let backend = Arc::new(InMemoryAuditBackend::new());
        let audit = Arc::new(AuditLogger::new(backend, Arc::new(ErrorMetrics::new())));
        GovernanceEngine::new(
            audit,
            SpendingLimits {
                max_txn_amount: 10_000.0,
                approval_threshold: 1_000.0,
                daily_limit: 20_000.0,
                currency: "USD".to_string(),
            },
            RateLimit {
                window_seconds: 60,
                max_txns_per_window: 5,
            },
            AnomalyConfig {
                unusual_amount_multiplier: 3.0,
                rapid_count: 3,
                rapid_window_seconds: 30,
            },
        )
    }

    fn ctx(amount: f64) -> TransactionContext {
        TransactionContext {
            txn_id: Uuid::new_v4().to_string(),
            entity_id: Some("acme".to_string()),
            amount,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn amount_over_max_is_blocking() {
        let engine = test_engine();
        let result = engine.validate_transaction(&ctx(10_001.0)).await.unwrap();
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.code == "spending-limit-max"));
        assert!(result.approval_request_id.is_none());
    }

    #[tokio::test]
    async fn amount_over_threshold_requires_approval() {
        let engine = test_engine();
        let result = engine.validate_transaction(&ctx(1_500.0)).await.unwrap();
        assert!(result.allowed);
        assert!(result.requires_approval);
        assert!(result.approval_request_id.is_some());
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold_reached() {
        let engine = test_engine();
        for _ in 0..5 {
            let t = ctx(10.0);
            engine.record_transaction(&t);
        }
        let result = engine.validate_transaction(&ctx(10.0)).await.unwrap();
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.code == "rate-limit"));
    }

    #[tokio::test]
    async fn approval_decision_resolves_pending_request() {
        let engine = test_engine();
        let result = engine.validate_transaction(&ctx(1_500.0)).await.unwrap();
        let request_id = result.approval_request_id.unwrap();

        let decided = engine
            .process_approval(&request_id, "compliance-officer-1", ApprovalDecision::Approve, None)
            .await
            .unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);

        let err = engine
            .process_approval(&request_id, "compliance-officer-1", ApprovalDecision::Deny, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, occam_core::ErrorCode::Conflict);
    }
}
