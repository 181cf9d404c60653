use super::AuditEvent;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// `prevHash` of the genesis event: a fixed 32-byte zero, hex-encoded (64 hex chars).
pub static GENESIS_HASH: Lazy<String> = Lazy::new(|| "0".repeat(64));

/// Canonical, deterministic, key-sorted JSON bytes of an event with its
/// `hash` field removed, so a third party can recompute `hash` from
/// `prev_hash` and this representation alone. `serde_json::Map` is a
/// `BTreeMap` by default (the `preserve_order` feature is not enabled),
/// so object keys are already sorted at every nesting level.
pub fn canonical_bytes(event: &AuditEvent) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("hash");
    }
    serde_json::to_vec(&value).map_err(Error::from)
}

/// `SHA-256(prev_hash || canonical(event_without_hash))`, hex-encoded.
pub fn compute_hash(prev_hash: &str, canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical);
    hex::encode(hasher.finalize())
}

/// Stamp `event.prev_hash`/`event.hash` in place, chaining off `prev_hash`.
pub fn link(event: &mut AuditEvent, prev_hash: String) -> Result<()> {
    event.prev_hash = prev_hash;
    event.hash = String::new();
    let canonical = canonical_bytes(event)?;
    event.hash = compute_hash(&event.prev_hash, &canonical);
    Ok(())
}

/// Recompute `event.hash` from its stored `prev_hash` and current body, and
/// compare against the stored value. `false` means the event (or its
/// `prev_hash` link) was tampered with after it was appended.
pub fn verify_link(event: &AuditEvent) -> Result<bool> {
    let mut probe = event.clone();
    probe.hash = String::new();
    let canonical = canonical_bytes(&probe)?;
    let recomputed = compute_hash(&event.prev_hash, &canonical);
    Ok(recomputed == event.hash)
}

/// Result of [`super::AuditBackend::verify`]: `ok = true` iff every event's
/// stored `hash` matches its recomputed hash AND each event's `prev_hash`
/// matches the previous event's stored `hash`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChainVerification {
    pub ok: bool,
    pub first_break_index: Option<usize>,
}

/// Verify a contiguous slice of the chain. `expected_prev` is the `hash` of
/// the event immediately preceding `events[0]` (or [`GENESIS_HASH`] when
/// verifying from the start of the log).
pub fn verify_chain(events: &[AuditEvent], expected_prev: &str) -> Result<ChainVerification> {
    let mut prev = expected_prev.to_string();
    for (idx, event) in events.iter().enumerate() {
        if event.prev_hash != prev {
            return Ok(ChainVerification {
                ok: false,
                first_break_index: Some(idx),
            });
        }
        if !verify_link(event)? {
            return Ok(ChainVerification {
                ok: false,
                first_break_index: Some(idx),
            });
        }
        prev = event.hash.clone();
    }
    Ok(ChainVerification {
        ok: true,
        first_break_index: None,
    })
}

/// Render an event as a single persisted line with `hash` moved to the last
/// field, per the kernel's line-delimited persisted format (§6.2). Object key
/// order in the in-memory/canonical representation is alphabetical (driven by
/// `serde_json::Map`'s `BTreeMap`); this function overrides that only for the
/// on-disk line, where the external contract calls for `hash` trailing.
pub fn to_persisted_line(event: &AuditEvent) -> Result<String> {
    let mut value = serde_json::to_value(event)?;
    let hash = value
        .as_object_mut()
        .and_then(|obj| obj.remove("hash"))
        .unwrap_or(serde_json::Value::Null);

    let mut line = serde_json::to_string(&value)?;
    line.pop(); // drop trailing '}'
    if value.as_object().map(|obj| !obj.is_empty()).unwrap_or(false) {
        line.push(',');
    }
    line.push_str("\"hash\":");
    line.push_str(&serde_json::to_string(&hash)?);
    line.push('}');
    Ok(line)
}

/// Minimal hex codec so the chain module has no dependency beyond `sha2`.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{:02x}", b).expect("writing to String cannot fail");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventType;

    fn sample(prev: &str) -> AuditEvent {
        let mut event = AuditEvent::builder(
            EventType::StateTransition,
            "advance",
            "draft -> pending_review",
        )
        .build();
        link(&mut event, prev.to_string()).unwrap();
        event
    }

    #[test]
    fn genesis_hash_is_64_zero_bytes_hex() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn link_and_verify_round_trip() {
        let event = sample(&GENESIS_HASH);
        assert!(verify_link(&event).unwrap());
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut event = sample(&GENESIS_HASH);
        event.description = "tampered".to_string();
        assert!(!verify_link(&event).unwrap());
    }

    #[test]
    fn chain_detects_break_at_correct_index() {
        let e1 = sample(&GENESIS_HASH);
        let mut e2 = sample(&e1.hash);
        let e3 = sample(&e2.hash);
        e2.metadata.insert("tampered".into(), serde_json::json!(true));
        let result = verify_chain(&[e1, e2, e3], &GENESIS_HASH).unwrap();
        assert_eq!(result.ok, false);
        assert_eq!(result.first_break_index, Some(1));
    }
}
