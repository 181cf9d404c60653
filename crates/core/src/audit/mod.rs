//! Tamper-evident, hash-chained audit log (C2).
//!
//! Every [`AuditEvent`] is linked to its predecessor by [`chain::link`] before
//! it is durable, so [`AuditBackend::verify`] can detect the first index at
//! which the chain was broken. [`AuditLogger`] is the stable, high-level API
//! the rest of the kernel calls into; backends and the chain math underneath
//! it are swappable.

pub mod chain;
pub mod event;
pub mod logger;
pub mod repository;
pub mod traits;

pub use chain::{ChainVerification, GENESIS_HASH};
pub use event::{AuditEvent, AuditEventBuilder, EventOutcome, EventSeverity, EventType};
pub use logger::AuditLogger;
pub use repository::{AuditRepository, FileAuditBackend, InMemoryAuditBackend};
pub use traits::{AuditBackend, AuditFilter, AuditFilterBuilder, Auditable, BackendHealth};
