//! Outbound notification dispatch (C9, §4.9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use occam_core::audit::{AuditEvent, EventOutcome, EventSeverity, EventType};
use occam_core::error::{Error, ErrorCode, Result};
use occam_core::{AuditLogger, SecureVault};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Email,
    ChatA,
    ChatB,
    Sms,
    Im,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Email => "email",
            Channel::ChatA => "chat-a",
            Channel::ChatB => "chat-b",
            Channel::Sms => "sms",
            Channel::Im => "im",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub severity: EventSeverity,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// An external channel collaborator. The kernel owns only this interface;
/// formatting (color, prefix) by severity and actual transport are the
/// adapter's responsibility, never the dispatcher's.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, message: &NotificationMessage, credentials: &[u8]) -> Result<()>;
}

/// Built-in fallback adapter that formats a message and logs it rather than
/// reaching an external channel. Useful where no real transport is wired in
/// yet, and as the minimal example of a leaf adapter: the kernel's `Result`
/// only appears at the trait boundary, internal formatting failures are
/// ordinary `anyhow` errors.
pub struct LoggingChannelAdapter;

#[async_trait]
impl ChannelAdapter for LoggingChannelAdapter {
    async fn send(&self, message: &NotificationMessage, _credentials: &[u8]) -> Result<()> {
        let formatted = format_for_log(message)
            .map_err(|e| Error::internal(format!("failed to format notification: {}", e)))?;
        tracing::info!(channel = %message.channel, "{}", formatted);
        Ok(())
    }
}

fn format_for_log(message: &NotificationMessage) -> anyhow::Result<String> {
    use std::fmt::Write;
    let prefix = match message.severity {
        EventSeverity::Critical => "[CRITICAL]",
        EventSeverity::High => "[HIGH]",
        EventSeverity::Warning => "[WARN]",
        EventSeverity::Info => "[INFO]",
    };
    let mut out = String::new();
    write!(out, "{} to {}: ", prefix, message.recipient)?;
    if let Some(subject) = &message.subject {
        write!(out, "{} — ", subject)?;
    }
    write!(out, "{}", message.body)?;
    Ok(out)
}

pub struct NotificationConfig {
    pub enabled_channels: HashMap<Channel, bool>,
    pub max_attempts: u32,
    pub initial_backoff: StdDuration,
}

impl NotificationConfig {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled_channels.get(&channel).copied().unwrap_or(false)
    }
}

/// Resolves credentials through the vault, invokes the configured adapter
/// for the message's channel, and retries transient failures with
/// exponential backoff up to `config.max_attempts` (§4.8's retry rule for
/// notification side effects).
pub struct NotificationDispatcher {
    vault: Arc<SecureVault>,
    audit: Arc<AuditLogger>,
    config: NotificationConfig,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    /// Vault scope under which each channel's send credentials are stored.
    credential_scope: String,
}

impl NotificationDispatcher {
    pub fn new(
        vault: Arc<SecureVault>,
        audit: Arc<AuditLogger>,
        config: NotificationConfig,
        credential_scope: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            audit,
            config,
            adapters: HashMap::new(),
            credential_scope: credential_scope.into(),
        }
    }

    pub fn register_adapter(&mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(channel, adapter);
    }

    pub async fn send(&self, message: NotificationMessage, workflow_id: Option<&str>) -> Result<DeliveryResult> {
        let delivery_id = uuid::Uuid::new_v4().to_string();

        if !self.config.is_enabled(message.channel) {
            return Err(Error::new(
                ErrorCode::ChannelDisabled,
                format!("channel {} is disabled", message.channel),
            ));
        }

        let adapter = self.adapters.get(&message.channel).ok_or_else(|| {
            Error::internal(format!("no adapter registered for channel {}", message.channel))
        })?;

        let credential_id = format!("{}:{}", self.credential_scope, message.channel);
        let credentials = self.resolve_credentials(&credential_id).await?;

        let mut attempts = 0u32;
        let mut backoff = self.config.initial_backoff;
        let mut last_error: Option<String> = None;

        let result = loop {
            attempts += 1;
            match adapter.send(&message, &credentials).await {
                Ok(()) => {
                    break DeliveryResult {
                        delivery_id: delivery_id.clone(),
                        status: DeliveryStatus::Sent,
                        attempts,
                        failure_reason: None,
                        sent_at: Some(Utc::now()),
                    };
                }
                Err(e) => {
                    last_error = Some(e.message.clone());
                    if attempts >= self.config.max_attempts {
                        break DeliveryResult {
                            delivery_id: delivery_id.clone(),
                            status: DeliveryStatus::Failed,
                            attempts,
                            failure_reason: last_error.clone(),
                            sent_at: None,
                        };
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        };

        let outcome = if result.status == DeliveryStatus::Sent {
            EventOutcome::Success
        } else {
            EventOutcome::Failure
        };

        if let Some(workflow_id) = workflow_id {
            self.audit
                .log_notification(workflow_id, &message.channel.to_string(), &message.recipient, outcome)
                .await?;
        } else {
            let event = AuditEvent::builder(
                EventType::NotificationSent,
                "dispatch",
                format!("{} notification to {}", message.channel, message.recipient),
            )
            .severity(if outcome == EventOutcome::Failure { EventSeverity::Warning } else { EventSeverity::Info })
            .metadata("channel", json!(message.channel.to_string()))
            .metadata("attempts", json!(result.attempts))
            .result(outcome)
            .build();
            self.audit.log_event(event).await?;
        }

        Ok(result)
    }

    async fn resolve_credentials(&self, credential_id: &str) -> Result<Vec<u8>> {
        match self.vault.get(credential_id).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.code == ErrorCode::ResourceNotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occam_core::config::SecurityConfig;
    use occam_core::error::ErrorMetrics;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl ChannelAdapter for FlakyAdapter {
        async fn send(&self, _message: &NotificationMessage, _credentials: &[u8]) -> Result<()> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(Error::internal("transient adapter failure"));
            }
            Ok(())
        }
    }

    fn test_audit() -> Arc<AuditLogger> {
        let backend = Arc::new(occam_core::audit::InMemoryAuditBackend::new());
        Arc::new(AuditLogger::new(backend, Arc::new(ErrorMetrics::new())))
    }

    fn test_security_config() -> SecurityConfig {
        SecurityConfig {
            aes_encryption_key: "01234567890123456789012345678901".to_string(),
        }
    }

    #[tokio::test]
    async fn disabled_channel_is_rejected_before_resolving_credentials() {
        let vault = Arc::new(SecureVault::new(&test_security_config()).unwrap());
        let mut enabled = HashMap::new();
        enabled.insert(Channel::Sms, false);
        let dispatcher = NotificationDispatcher::new(
            vault,
            test_audit(),
            NotificationConfig {
                enabled_channels: enabled,
                max_attempts: 3,
                initial_backoff: StdDuration::from_millis(1),
            },
            "notifications",
        );

        let message = NotificationMessage {
            channel: Channel::Sms,
            recipient: "+15555550000".to_string(),
            subject: None,
            body: "hello".to_string(),
            severity: EventSeverity::Info,
            metadata: json!({}),
        };

        let err = dispatcher.send(message, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ChannelDisabled);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let vault = Arc::new(SecureVault::new(&test_security_config()).unwrap());
        let mut enabled = HashMap::new();
        enabled.insert(Channel::Email, true);
        let mut dispatcher = NotificationDispatcher::new(
            vault,
            test_audit(),
            NotificationConfig {
                enabled_channels: enabled,
                max_attempts: 5,
                initial_backoff: StdDuration::from_millis(1),
            },
            "notifications",
        );
        dispatcher.register_adapter(
            Channel::Email,
            Arc::new(FlakyAdapter { fail_times: AtomicU32::new(2) }),
        );

        let message = NotificationMessage {
            channel: Channel::Email,
            recipient: "ops@example.com".to_string(),
            subject: Some("alert".to_string()),
            body: "check this out".to_string(),
            severity: EventSeverity::Warning,
            metadata: json!({}),
        };

        let result = dispatcher.send(message, None).await.unwrap();
        assert_eq!(result.status, DeliveryStatus::Sent);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn logging_adapter_formats_and_delivers() {
        let vault = Arc::new(SecureVault::new(&test_security_config()).unwrap());
        let mut enabled = HashMap::new();
        enabled.insert(Channel::Im, true);
        let mut dispatcher = NotificationDispatcher::new(
            vault,
            test_audit(),
            NotificationConfig {
                enabled_channels: enabled,
                max_attempts: 1,
                initial_backoff: StdDuration::from_millis(1),
            },
            "notifications",
        );
        dispatcher.register_adapter(Channel::Im, Arc::new(LoggingChannelAdapter));

        let message = NotificationMessage {
            channel: Channel::Im,
            recipient: "room-1".to_string(),
            subject: None,
            body: "build is green".to_string(),
            severity: EventSeverity::Info,
            metadata: json!({}),
        };

        let result = dispatcher.send(message, None).await.unwrap();
        assert_eq!(result.status, DeliveryStatus::Sent);
    }
}
