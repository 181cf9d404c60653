use super::encryption::EncryptionService;
use crate::audit::{AuditEvent, AuditLogger, EventSeverity, EventType};
use crate::config::SecurityConfig;
use crate::error::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A single secret held by the vault. `ciphertext`/`iv`/`auth_tag` are stored
/// as separate fields rather than one blob so a reader can validate shape
/// without decrypting. `iv` is the AES-256-GCM nonce (96 bits, the standard
/// size); `auth_tag` is always 16 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: String,
    pub scope: String,
    pub kind: String,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u32,
}

impl VaultEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Metadata view of a [`VaultEntry`] with the plaintext-bearing fields
/// stripped, returned by [`SecureVault::by_scope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntryMetadata {
    pub id: String,
    pub scope: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u32,
}

impl From<&VaultEntry> for VaultEntryMetadata {
    fn from(entry: &VaultEntry) -> Self {
        Self {
            id: entry.id.clone(),
            scope: entry.scope.clone(),
            kind: entry.kind.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            version: entry.version,
        }
    }
}

/// Encrypted-at-rest secret store (C1). Entries are addressed by id and
/// tagged with a scope/kind for grouped retrieval. Per-entry access is
/// serialized by a fine-grained lock inside the map; master-key rotation
/// takes an additional vault-wide exclusive lock so no entry read/write can
/// interleave with a rotation half-way through re-encrypting the store.
pub struct SecureVault {
    entries: Arc<DashMap<String, Arc<Mutex<VaultEntry>>>>,
    cipher: Arc<RwLock<EncryptionService>>,
    rotation_lock: Arc<RwLock<()>>,
    audit: Option<Arc<AuditLogger>>,
}

impl SecureVault {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        Ok(Self {
            entries: Arc::new(DashMap::new()),
            cipher: Arc::new(RwLock::new(EncryptionService::new(config)?)),
            rotation_lock: Arc::new(RwLock::new(())),
            audit: None,
        })
    }

    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Encrypt `plaintext` and store it under a fresh id.
    pub async fn store(
        &self,
        scope: impl Into<String>,
        kind: impl Into<String>,
        plaintext: &[u8],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let _rotation_guard = self.rotation_lock.read().await;
        let cipher = self.cipher.read().await;
        let (iv, ciphertext, auth_tag) = cipher.encrypt_parts(plaintext)?;

        let id = Uuid::new_v4().to_string();
        let entry = VaultEntry {
            id: id.clone(),
            scope: scope.into(),
            kind: kind.into(),
            ciphertext,
            iv,
            auth_tag,
            created_at: Utc::now(),
            expires_at,
            version: 1,
        };

        self.audit_event(EventType::VaultStore, &entry, EventSeverity::Info, "stored").await;
        self.entries.insert(id.clone(), Arc::new(Mutex::new(entry)));
        Ok(id)
    }

    /// Decrypt and return the plaintext for `id`. Returns
    /// [`ErrorCode::ResourceNotFound`] for both a missing id and an expired
    /// one (the latter carries `metadata.expired = true`, see
    /// [`Error::expired`]), and [`ErrorCode::IntegrityViolation`] — logged as
    /// a critical audit event — when the auth tag fails to verify.
    pub async fn get(&self, id: &str) -> Result<Vec<u8>> {
        let _rotation_guard = self.rotation_lock.read().await;
        let handle = self
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found(format!("vault entry {} not found", id)))?;

        let entry = handle.lock().await;
        if entry.is_expired(Utc::now()) {
            return Err(Error::expired(format!("vault entry {} has expired", id)));
        }

        let cipher = self.cipher.read().await;
        match cipher.decrypt_parts(&entry.iv, &entry.ciphertext, &entry.auth_tag) {
            Ok(plaintext) => {
                self.audit_event(EventType::VaultAccess, &entry, EventSeverity::Info, "accessed").await;
                Ok(plaintext)
            }
            Err(_) => {
                self.audit_event(
                    EventType::VaultIntegrityViolation,
                    &entry,
                    EventSeverity::Critical,
                    "auth tag verification failed",
                )
                .await;
                Err(Error::integrity_violation(format!(
                    "vault entry {} failed auth tag verification",
                    id
                )))
            }
        }
    }

    /// List metadata (no plaintext, no ciphertext) for every live entry in `scope`.
    pub async fn by_scope(&self, scope: &str) -> Vec<VaultEntryMetadata> {
        let mut out = Vec::new();
        for item in self.entries.iter() {
            let entry = item.value().lock().await;
            if entry.scope == scope {
                out.push(VaultEntryMetadata::from(&*entry));
            }
        }
        out
    }

    /// Remove an entry. Returns `false` if it did not exist.
    pub async fn delete(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Re-encrypt the entry under a freshly generated id, retiring the old
    /// one. Used to periodically rotate individual secrets without a full
    /// master-key rotation.
    pub async fn rotate(&self, id: &str) -> Result<String> {
        let _rotation_guard = self.rotation_lock.read().await;
        let handle = self
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found(format!("vault entry {} not found", id)))?;

        let (scope, kind, plaintext, expires_at, version) = {
            let entry = handle.lock().await;
            let cipher = self.cipher.read().await;
            let plaintext = cipher
                .decrypt_parts(&entry.iv, &entry.ciphertext, &entry.auth_tag)
                .map_err(|_| Error::integrity_violation(format!("vault entry {} failed auth tag verification", id)))?;
            (entry.scope.clone(), entry.kind.clone(), plaintext, entry.expires_at, entry.version)
        };

        let cipher = self.cipher.read().await;
        let (iv, ciphertext, auth_tag) = cipher.encrypt_parts(&plaintext)?;
        let new_id = Uuid::new_v4().to_string();
        let new_entry = VaultEntry {
            id: new_id.clone(),
            scope,
            kind,
            ciphertext,
            iv,
            auth_tag,
            created_at: Utc::now(),
            expires_at,
            version: version + 1,
        };

        self.audit_event(EventType::VaultRotation, &new_entry, EventSeverity::Info, "rotated").await;
        self.entries.insert(new_id.clone(), Arc::new(Mutex::new(new_entry)));
        self.entries.remove(id);
        Ok(new_id)
    }

    /// Re-encrypt every entry under `new_key` and only then replace the
    /// active cipher, so a failure partway through leaves the vault
    /// unchanged under the old key (all-or-nothing per the kernel's
    /// transactional rotation contract).
    pub async fn rotate_master_key(&self, new_key: &[u8]) -> Result<()> {
        let _rotation_guard = self.rotation_lock.write().await;
        let new_cipher = EncryptionService::from_key_bytes(new_key)?;

        let current_cipher = self.cipher.read().await;
        let mut re_encrypted = Vec::with_capacity(self.entries.len());

        for item in self.entries.iter() {
            let entry = item.value().lock().await;
            let plaintext = current_cipher
                .decrypt_parts(&entry.iv, &entry.ciphertext, &entry.auth_tag)
                .map_err(|_| {
                    Error::integrity_violation(format!(
                        "vault entry {} failed auth tag verification during master key rotation",
                        entry.id
                    ))
                })?;
            let (iv, ciphertext, auth_tag) = new_cipher.encrypt_parts(&plaintext)?;
            re_encrypted.push((item.key().clone(), iv, ciphertext, auth_tag));
        }
        drop(current_cipher);

        for (id, iv, ciphertext, auth_tag) in re_encrypted {
            if let Some(handle) = self.entries.get(&id) {
                let mut entry = handle.lock().await;
                entry.iv = iv;
                entry.ciphertext = ciphertext;
                entry.auth_tag = auth_tag;
                entry.version += 1;
            }
        }

        *self.cipher.write().await = new_cipher;
        Ok(())
    }

    async fn audit_event(&self, event_type: EventType, entry: &VaultEntry, severity: EventSeverity, action: &str) {
        if let Some(ref audit) = self.audit {
            let event = AuditEvent::builder(event_type, action, format!("vault entry {} ({})", entry.id, entry.scope))
                .severity(severity)
                .entity_id(entry.id.clone())
                .metadata("scope", serde_json::json!(entry.scope))
                .metadata("kind", serde_json::json!(entry.kind))
                .build();
            let _ = audit.log_event(event).await;
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            aes_encryption_key: "01234567890123456789012345678901".chars().take(32).collect(),
        }
    }

    #[tokio::test]
    async fn store_and_get_round_trips_plaintext() {
        let vault = SecureVault::new(&test_config()).unwrap();
        let id = vault.store("payments", "api-key", b"super-secret", None).await.unwrap();
        let plaintext = vault.get(&id).await.unwrap();
        assert_eq!(plaintext, b"super-secret");
    }

    #[tokio::test]
    async fn expired_entry_is_distinguished_from_missing() {
        let vault = SecureVault::new(&test_config()).unwrap();
        let past = Utc::now() - chrono::Duration::seconds(1);
        let id = vault.store("payments", "token", b"value", Some(past)).await.unwrap();

        let err = vault.get(&id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
        assert_eq!(err.context.metadata.get("expired").and_then(|v| v.as_bool()), Some(true));

        let err = vault.get("does-not-exist").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
        assert_eq!(err.context.metadata.get("expired"), None);
    }

    #[tokio::test]
    async fn rotate_produces_new_id_with_same_plaintext() {
        let vault = SecureVault::new(&test_config()).unwrap();
        let id = vault.store("payments", "api-key", b"rotate-me", None).await.unwrap();
        let new_id = vault.rotate(&id).await.unwrap();

        assert_ne!(id, new_id);
        assert!(vault.get(&id).await.is_err());
        assert_eq!(vault.get(&new_id).await.unwrap(), b"rotate-me");
    }

    #[tokio::test]
    async fn rotate_master_key_keeps_entries_readable() {
        let vault = SecureVault::new(&test_config()).unwrap();
        let id = vault.store("payments", "api-key", b"under-old-key", None).await.unwrap();

        let new_key = "98765432109876543210987654321098".as_bytes();
        vault.rotate_master_key(new_key).await.unwrap();

        assert_eq!(vault.get(&id).await.unwrap(), b"under-old-key");
    }

    #[tokio::test]
    async fn by_scope_returns_metadata_only() {
        let vault = SecureVault::new(&test_config()).unwrap();
        vault.store("payments", "api-key", b"one", None).await.unwrap();
        vault.store("payments", "webhook-secret", b"two", None).await.unwrap();
        vault.store("other-scope", "api-key", b"three", None).await.unwrap();

        let entries = vault.by_scope("payments").await;
        assert_eq!(entries.len(), 2);
    }
}
