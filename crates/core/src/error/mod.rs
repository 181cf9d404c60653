//! # Error Handling Framework
//!
//! Structured error management shared by every kernel component, built around
//! a closed taxonomy of error kinds rather than ad-hoc error types per module:
//!
//! - `NotFound` / `Invalid` / `PermissionDenied` / `Conflict` — recoverable,
//!   caller can retry with different input.
//! - `PolicyViolation` — a governance blocking violation; recoverable.
//! - `ApprovalRequired` — not a failure; carries an approval request id and
//!   pauses the caller's workflow.
//! - `IntegrityViolation` — audit chain mismatch or vault auth-tag failure;
//!   the only kind that halts the system (see [`Error::is_fatal`]).
//! - `Timeout` / `Cancelled` — operation aborted; partial effects are audited,
//!   never rolled back.
//! - `Internal` — unexpected; audited and surfaced as a 500-class error.
//!
//! ## Context Tracking
//!
//! - **Request Context**: caller tracking with correlation ids.
//! - **Error Context**: structured error metadata, trace, and timestamps.
//!
//! ## Monitoring Integration
//!
//! - **Error Metrics**: sliding-window error rate tracking per category.
//! - **Structured Logging**: `tracing` events keyed by severity.

pub mod codes;
pub mod context;
pub mod framework;
pub mod metrics;

pub use codes::ErrorCode;
pub use context::{ErrorContext, RequestContext};
pub use framework::{Error, ErrorCategory, ErrorSeverity, Result};
pub use metrics::ErrorMetrics;