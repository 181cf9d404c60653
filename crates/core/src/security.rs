pub mod encryption;
pub mod vault;

pub use encryption::EncryptionService;
pub use vault::{SecureVault, VaultEntry, VaultEntryMetadata};
