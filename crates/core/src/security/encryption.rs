use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use crate::{config::SecurityConfig, error::Result, Error};

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let key_bytes = config.aes_encryption_key.as_bytes();
        
        if key_bytes.len() != 32 {
            return Err(Error::new(
                crate::error::ErrorCode::EncryptionError,
                "AES key must be exactly 32 bytes"
            ));
        }

        Self::from_key_bytes(key_bytes)
    }

    /// Build a service directly from a 32-byte key, bypassing [`SecurityConfig`].
    /// Used by the vault to construct the post-rotation cipher before it is
    /// committed, without round-tripping through a fresh config load.
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            return Err(Error::new(
                crate::error::ErrorCode::EncryptionError,
                "AES key must be exactly 32 bytes",
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        
        let ciphertext = self.cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::new(crate::error::ErrorCode::EncryptionError, format!("Encryption failed: {}", e)))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 12 {
            return Err(Error::new(crate::error::ErrorCode::DecryptionError, "Invalid ciphertext length"));
        }

        let (nonce_bytes, encrypted_data) = ciphertext.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher
            .decrypt(nonce, encrypted_data)
            .map_err(|e| Error::new(crate::error::ErrorCode::DecryptionError, format!("Decryption failed: {}", e)))?;

        Ok(plaintext)
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        use base64::{Engine, engine::general_purpose::STANDARD};
        let encrypted = self.encrypt(plaintext.as_bytes())?;
        Ok(STANDARD.encode(&encrypted))
    }

    pub fn decrypt_string(&self, ciphertext: &str) -> Result<String> {
        use base64::{Engine, engine::general_purpose::STANDARD};
        let decoded = STANDARD.decode(ciphertext)
            .map_err(|e| Error::new(crate::error::ErrorCode::DecryptionError, format!("Invalid base64: {}", e)))?;

        let decrypted = self.decrypt(&decoded)?;

        String::from_utf8(decrypted)
            .map_err(|e| Error::new(crate::error::ErrorCode::DecryptionError, format!("Invalid UTF-8: {}", e)))
    }

    /// Encrypt into separate `(nonce, ciphertext, tag)` parts rather than one
    /// concatenated blob, for callers that persist them as distinct fields.
    /// AES-256-GCM's 96-bit nonce (the standard size; anything else requires
    /// a slower variable-nonce setup) and 128-bit tag.
    pub fn encrypt_parts(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut combined = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::new(crate::error::ErrorCode::EncryptionError, format!("Encryption failed: {}", e)))?;

        if combined.len() < 16 {
            return Err(Error::new(crate::error::ErrorCode::EncryptionError, "ciphertext shorter than auth tag"));
        }
        let tag = combined.split_off(combined.len() - 16);
        Ok((nonce.to_vec(), combined, tag))
    }

    /// Inverse of [`Self::encrypt_parts`]. A tag mismatch surfaces as
    /// [`crate::error::ErrorCode::DecryptionError`] — callers that treat a
    /// mismatch as a vault integrity violation should catch that explicitly.
    pub fn decrypt_parts(&self, nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != 12 {
            return Err(Error::new(crate::error::ErrorCode::DecryptionError, "invalid nonce length"));
        }
        let nonce = Nonce::from_slice(nonce);
        let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);

        self.cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|e| Error::new(crate::error::ErrorCode::DecryptionError, format!("Decryption failed: {}", e)))
    }
}

