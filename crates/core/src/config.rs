//! # Configuration Management System
//!
//! Hierarchical configuration for the kernel, loaded from multiple sources in
//! order of precedence:
//!
//! 1. **Environment Variables** (highest precedence)
//! 2. **Environment-specific TOML files** (e.g., `config/production.toml`)
//! 3. **Default TOML file** (`config/default.toml`) (lowest precedence)
//!
//! ## Usage
//!
//! ```rust
//! use occam_core::Config;
//!
//! let config = Config::load().expect("failed to load configuration");
//! let key_len = config.security.aes_encryption_key.len();
//! ```
//!
//! ## Environment Selection
//!
//! Selected via the `ENVIRONMENT` variable: `development` (default),
//! `testing`, `production`.
//!
//! ## Configuration Categories
//!
//! - **Security**: the vault's master encryption key
//! - **Audit**: hash-chain persistence backend and path
//! - **Telemetry**: SLO targets and the Prometheus exposition endpoint
//! - **Governance**: approval thresholds and timeouts
//! - **Notification**: enabled channels and delivery retry policy

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Top-level configuration, populated from TOML files and environment
/// variables and validated once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
    pub telemetry: TelemetryConfig,
    pub governance: GovernanceConfig,
    pub notification: NotificationConfig,
}

/// Application-level settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kernel_name: String,
    pub environment: String,
    pub log_level: String,
}

/// Cryptographic configuration for [`crate::security::SecureVault`].
///
/// ```toml
/// [security]
/// aes_encryption_key = "your-32-char-encryption-key-here!"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// AES-256-GCM master key for the secure vault. **Must be exactly 32
    /// bytes.** Provided via the `AES_ENCRYPTION_KEY` environment variable in
    /// production; never committed to a TOML file.
    pub aes_encryption_key: String,
}

/// Audit log persistence configuration (§6.2).
#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// `"memory"` or `"file"`. `"memory"` is for tests and ephemeral runs;
    /// production deployments should use `"file"` so the chain survives a restart.
    pub backend: String,
    /// Path to the line-delimited audit log when `backend = "file"`.
    pub file_path: String,
    /// Additional backends the primary fans writes out to (best-effort,
    /// never authoritative). Currently only `"file"` is meaningful here.
    pub secondary_backends: Vec<String>,
}

/// Telemetry & SLO configuration (§4.3).
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub metrics_path: String,
    pub metrics_namespace: String,
    pub slo: SloConfig,
}

/// Mirrors [`crate::telemetry::SloTargets`] as a deserializable config shape;
/// converted via `From<&SloConfig> for SloTargets`.
#[derive(Debug, Deserialize, Clone)]
pub struct SloConfig {
    pub retrieval_latency_ms: f64,
    pub build_time_secs: f64,
    pub compliance_accuracy: f64,
    pub audit_trace_verification: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl From<&SloConfig> for crate::telemetry::SloTargets {
    fn from(config: &SloConfig) -> Self {
        Self {
            retrieval_latency_ms: config.retrieval_latency_ms,
            build_time_secs: config.build_time_secs,
            compliance_accuracy: config.compliance_accuracy,
            audit_trace_verification: config.audit_trace_verification,
            cpu_percent: config.cpu_percent,
            memory_percent: config.memory_percent,
        }
    }
}

/// Governance engine configuration (§4.2): the thresholds and timeouts that
/// decide whether a workflow step auto-proceeds or is parked pending approval.
#[derive(Debug, Deserialize, Clone)]
pub struct GovernanceConfig {
    /// Monetary amount above which a step requires explicit approval,
    /// expressed in the smallest currency unit (cents).
    pub auto_approve_limit_cents: i64,
    /// How long an approval request waits before escalating (§4.2 "expired"
    /// outcome) if nobody responds.
    pub approval_timeout_secs: u64,
    /// Drift severities (see [`crate::audit::EventSeverity`]) that force a
    /// governance hold regardless of the monetary threshold.
    pub hold_on_severities: Vec<String>,
}

/// Notification dispatcher configuration (§4.9). Structured like the
/// teacher's multi-provider email config, generalized to the kernel's
/// channel set.
#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    pub enabled_channels: Vec<String>, // "email", "slack", "webhook"
    pub max_retries: u32,
    pub retry_backoff_cap_secs: u64,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_email: String,
    pub smtp_from_name: String,
    pub use_tls: bool,
    pub slack_webhook_url: Option<String>,
    pub generic_webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled_channels: vec!["email".to_string()],
            max_retries: 5,
            retry_backoff_cap_secs: 300,
            smtp_host: None,
            smtp_port: Some(587),
            smtp_username: None,
            smtp_password: None,
            smtp_from_email: "noreply@example.com".to_string(),
            smtp_from_name: "OCCAM Kernel".to_string(),
            use_tls: true,
            slack_webhook_url: None,
            generic_webhook_url: None,
            timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from `config/default.toml`, `config/{environment}.toml`,
    /// then environment variables, in increasing order of precedence, and
    /// fail fast if the result doesn't pass [`Self::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(Environment::with_prefix("").separator("_"));

        let config = builder.build()?;
        let mut loaded_config: Config = config.try_deserialize()?;

        loaded_config.validate(&environment)?;

        Ok(loaded_config)
    }

    /// Validate critical security and operational settings, with stricter
    /// rules under `environment == "production"`.
    fn validate(&mut self, environment: &str) -> Result<(), ConfigError> {
        use config::ConfigError;

        if self.security.aes_encryption_key.len() != 32 {
            return Err(ConfigError::Message(format!(
                "AES encryption key must be exactly 32 characters long (current: {})",
                self.security.aes_encryption_key.len()
            )));
        }

        if !matches!(self.audit.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::Message(format!(
                "audit.backend must be \"memory\" or \"file\" (got \"{}\")",
                self.audit.backend
            )));
        }

        if self.audit.backend == "file" && self.audit.file_path.trim().is_empty() {
            return Err(ConfigError::Message(
                "audit.file_path must be set when audit.backend = \"file\"".to_string(),
            ));
        }

        if self.governance.auto_approve_limit_cents < 0 {
            return Err(ConfigError::Message(
                "governance.auto_approve_limit_cents must not be negative".to_string(),
            ));
        }

        if self.governance.approval_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "governance.approval_timeout_secs must be greater than zero".to_string(),
            ));
        }

        for channel in &self.notification.enabled_channels {
            if !matches!(channel.as_str(), "email" | "slack" | "webhook") {
                return Err(ConfigError::Message(format!(
                    "notification.enabled_channels contains unknown channel \"{}\"",
                    channel
                )));
            }
        }

        if environment == "production" {
            self.validate_production_security()?;
        }

        Ok(())
    }

    /// Reject insecure placeholder values that would otherwise slip into a
    /// production deployment.
    fn validate_production_security(&self) -> Result<(), ConfigError> {
        use config::ConfigError;

        let error_indicators = ["ERROR_", "INSECURE_DEFAULT", "CHANGE_THIS", "NOT_SET", "CHECK_ENVIRONMENT", "PLACEHOLDER"];

        for indicator in &error_indicators {
            if self.security.aes_encryption_key.contains(indicator) {
                return Err(ConfigError::Message(format!(
                    "Production deployment detected insecure AES encryption key. Set AES_ENCRYPTION_KEY environment variable. Current value contains: {}",
                    indicator
                )));
            }
        }

        if self.notification.enabled_channels.iter().any(|c| c == "email") {
            if let Some(ref smtp_host) = self.notification.smtp_host {
                for indicator in &error_indicators {
                    if smtp_host.contains(indicator) {
                        return Err(ConfigError::Message(format!(
                            "Production deployment detected missing SMTP host. Set SMTP_HOST environment variable. Current value contains: {}",
                            indicator
                        )));
                    }
                }
            }
        }

        if self.notification.enabled_channels.iter().any(|c| c == "slack") && self.notification.slack_webhook_url.is_none() {
            return Err(ConfigError::Message(
                "Production deployment enables the slack channel without slack_webhook_url".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            app: AppConfig {
                kernel_name: "occam".to_string(),
                environment: "development".to_string(),
                log_level: "info".to_string(),
            },
            security: SecurityConfig {
                aes_encryption_key: "01234567890123456789012345678901".to_string(),
            },
            audit: AuditConfig {
                backend: "memory".to_string(),
                file_path: String::new(),
                secondary_backends: vec![],
            },
            telemetry: TelemetryConfig {
                metrics_enabled: true,
                metrics_port: 9090,
                metrics_path: "/metrics".to_string(),
                metrics_namespace: "occam".to_string(),
                slo: SloConfig {
                    retrieval_latency_ms: 2500.0,
                    build_time_secs: 420.0,
                    compliance_accuracy: 0.97,
                    audit_trace_verification: 1.0,
                    cpu_percent: 80.0,
                    memory_percent: 75.0,
                },
            },
            governance: GovernanceConfig {
                auto_approve_limit_cents: 100_000,
                approval_timeout_secs: 3600,
                hold_on_severities: vec!["critical".to_string()],
            },
            notification: NotificationConfig::default(),
        }
    }

    #[test]
    fn rejects_wrong_length_aes_key() {
        let mut config = sample_config();
        config.security.aes_encryption_key = "too-short".to_string();
        assert!(config.validate("development").is_err());
    }

    #[test]
    fn rejects_file_backend_without_path() {
        let mut config = sample_config();
        config.audit.backend = "file".to_string();
        assert!(config.validate("development").is_err());
    }

    #[test]
    fn rejects_unknown_notification_channel() {
        let mut config = sample_config();
        config.notification.enabled_channels = vec!["carrier-pigeon".to_string()];
        assert!(config.validate("development").is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let mut config = sample_config();
        assert!(config.validate("development").is_ok());
    }
}
