pub mod audit;
pub mod config;
pub mod error;
pub mod security;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use audit::{AuditEvent, AuditLogger, AuditRepository};
pub use config::Config;
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use security::{EncryptionService, SecureVault, VaultEntry};
pub use telemetry::{MetricsRegistry, MetricsService, SloReport, TelemetryService};
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

/// Installs a `tracing` subscriber for test output. The workspace ships no
/// binary target, so there is no `main`-level `tracing_subscriber::registry()`
/// init path; this is the one place it's wired up, for tests across every
/// crate that want to see `tracing` output (`RUST_LOG=occam_core=debug cargo
/// test -- --nocapture`). Safe to call from multiple tests: `try_init` is a
/// no-op once a global subscriber is already set.
#[cfg(test)]
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let _ = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}
