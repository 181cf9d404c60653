use sha2::{Digest, Sha256};

/// Deterministic, key-sorted JSON bytes of `value`. Shares the same trick as
/// [`crate::audit::chain::canonical_bytes`]: `serde_json::Map` is a `BTreeMap`
/// by default, so round-tripping through `Value` sorts object keys at every
/// nesting level with no custom canonicalization code.
pub fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Derive a stable, content-addressed id: `SHA-256(salt || canonical(content))`,
/// hex-encoded. Used by the ontology store so re-ingesting byte-identical
/// content under the same salt yields the same id instead of a fresh UUID,
/// letting callers detect duplicates without a separate index.
pub fn content_id(content: &serde_json::Value, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(canonical_json_bytes(content));
    hex_encode(hasher.finalize())
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.as_ref().len() * 2);
    for b in bytes.as_ref() {
        write!(s, "{:02x}", b).expect("writing to String cannot fail");
    }
    s
}

/// Strip everything but alphanumerics, whitespace, and a small punctuation
/// allowlist. Used when free-text fields (descriptions, notification bodies)
/// are interpolated into log lines or outbound messages.
pub fn sanitize_string(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-_.,:;!?()@".contains(*c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_stable_across_key_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(content_id(&a, "salt"), content_id(&b, "salt"));
    }

    #[test]
    fn content_id_differs_with_salt() {
        let content = serde_json::json!({"clause": "must retain records for 7 years"});
        assert_ne!(content_id(&content, "salt-a"), content_id(&content, "salt-b"));
    }

    #[test]
    fn sanitize_string_drops_control_characters() {
        assert_eq!(sanitize_string("hello\x00world<script>"), "helloworldscript");
    }
}
