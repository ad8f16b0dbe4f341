//! Encrypted vault records
//!
//! The vault holds a sensitive sub-ledger (balance plus history) that must
//! never reach the remote store in plaintext. A symmetric key is derived
//! from the user's PIN with PBKDF2-HMAC-SHA256 and the payload sealed with
//! AES-256-GCM before the record leaves the device. Recovery metadata (PIN
//! hash, secret question and answer hash) travels alongside as salted
//! hashes, never encrypted under the payload key, so cross-device
//! authentication and PIN recovery work without the remote ever learning
//! the secret.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{new_record_id, SyncMetadata};

pub const VAULT_ALGORITHM: &str = "AES-256-GCM";
pub const VAULT_KDF: &str = "PBKDF2-HMAC-SHA256";
pub const VAULT_KDF_ITERATIONS: u32 = 100_000;
pub const VAULT_FORMAT_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Vault failures, kept distinct from [`crate::error::Error`] so a wrong
/// PIN is distinguishable from absent data.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Wrong PIN or corrupted ciphertext
    #[error("Vault decryption failed (wrong PIN or corrupt data)")]
    DecryptFailed,

    /// Encryption metadata is missing, malformed, or names an unsupported
    /// algorithm
    #[error("Invalid vault metadata: {0}")]
    InvalidMetadata(String),

    /// Payload could not be sealed
    #[error("Vault encryption failed: {0}")]
    EncryptFailed(String),

    /// Secret answer did not match during PIN recovery
    #[error("Secret answer does not match")]
    AnswerMismatch,

    /// PIN did not match the stored hash
    #[error("PIN does not match")]
    PinMismatch,
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// The plaintext vault contents. Never serialized to either store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPayload {
    pub balance_minor: i64,
    #[serde(default)]
    pub history: Vec<VaultHistoryEntry>,
}

/// One movement in the vault sub-ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHistoryEntry {
    pub id: String,
    pub amount_minor: i64,
    #[serde(default)]
    pub description: String,
    pub occurred_at: i64,
}

/// How a payload was sealed. Stored in the clear next to the ciphertext;
/// contains nothing secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub key_derivation: String,
    pub iterations: u32,
    pub salt_hex: String,
    pub iv_hex: String,
    pub version: u32,
}

/// A vault record as it exists in both stores: sealed payload plus clear
/// recovery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedVaultRecord {
    pub id: String,
    pub user_id: String,
    /// Base64 AES-256-GCM ciphertext of the serialized [`VaultPayload`]
    pub encrypted_payload: String,
    pub encryption_metadata: EncryptionMetadata,
    pub pin_hash: String,
    pub pin_salt: String,
    pub secret_question: String,
    pub secret_answer_hash: String,
    pub secret_answer_salt: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    pub sync_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl EncryptedVaultRecord {
    /// Create a vault for a user, sealing `payload` under `pin`.
    pub fn create(
        user_id: impl Into<String>,
        pin: &str,
        secret_question: impl Into<String>,
        secret_answer: &str,
        payload: &VaultPayload,
    ) -> VaultResult<Self> {
        let (encrypted_payload, encryption_metadata) = seal(pin, payload)?;

        let pin_salt = hex::encode(random_bytes(SALT_LEN));
        let answer_salt = hex::encode(random_bytes(SALT_LEN));
        let now = chrono::Utc::now().timestamp_millis();

        Ok(Self {
            id: new_record_id(),
            user_id: user_id.into(),
            encrypted_payload,
            encryption_metadata,
            pin_hash: salted_hash(&pin_salt, pin),
            pin_salt,
            secret_question: secret_question.into(),
            secret_answer_hash: salted_hash(&answer_salt, &normalize_answer(secret_answer)),
            secret_answer_salt: answer_salt,
            created_at: now,
            updated_at: now,
            sync_version: 1,
            sync: None,
        })
    }

    /// Decrypt the payload. A wrong PIN fails the GCM tag check and
    /// surfaces as [`VaultError::DecryptFailed`], never as wrong data.
    pub fn open(&self, pin: &str) -> VaultResult<VaultPayload> {
        let meta = &self.encryption_metadata;

        if meta.algorithm != VAULT_ALGORITHM {
            return Err(VaultError::InvalidMetadata(format!(
                "Unsupported algorithm: {}",
                meta.algorithm
            )));
        }
        if meta.key_derivation != VAULT_KDF {
            return Err(VaultError::InvalidMetadata(format!(
                "Unsupported key derivation: {}",
                meta.key_derivation
            )));
        }

        let salt = hex::decode(&meta.salt_hex)
            .map_err(|_| VaultError::InvalidMetadata("Malformed salt".to_string()))?;
        let iv = hex::decode(&meta.iv_hex)
            .map_err(|_| VaultError::InvalidMetadata("Malformed IV".to_string()))?;
        if iv.len() != IV_LEN {
            return Err(VaultError::InvalidMetadata("Bad IV length".to_string()));
        }
        let ciphertext = BASE64
            .decode(&self.encrypted_payload)
            .map_err(|_| VaultError::InvalidMetadata("Malformed ciphertext".to_string()))?;

        let key = derive_key(pin, &salt, meta.iterations);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| VaultError::InvalidMetadata("Bad key length".to_string()))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| VaultError::DecryptFailed)?;

        serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptFailed)
    }

    /// Re-seal a new payload under the existing PIN. Fresh salt and IV on
    /// every write; the key is never reused across payload versions.
    pub fn update_payload(&mut self, pin: &str, payload: &VaultPayload) -> VaultResult<()> {
        if !self.verify_pin(pin) {
            return Err(VaultError::PinMismatch);
        }

        let (encrypted_payload, encryption_metadata) = seal(pin, payload)?;
        self.encrypted_payload = encrypted_payload;
        self.encryption_metadata = encryption_metadata;
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.sync_version += 1;
        Ok(())
    }

    #[must_use]
    pub fn verify_pin(&self, pin: &str) -> bool {
        salted_hash(&self.pin_salt, pin) == self.pin_hash
    }

    #[must_use]
    pub fn verify_answer(&self, answer: &str) -> bool {
        salted_hash(&self.secret_answer_salt, &normalize_answer(answer)) == self.secret_answer_hash
    }

    /// Recover from a forgotten PIN: verify the secret answer, then seal
    /// the caller-supplied payload under the new PIN. The payload must be
    /// supplied because the old ciphertext cannot be opened without the
    /// old PIN.
    pub fn reset_pin(
        &mut self,
        secret_answer: &str,
        new_pin: &str,
        payload: &VaultPayload,
    ) -> VaultResult<()> {
        if !self.verify_answer(secret_answer) {
            return Err(VaultError::AnswerMismatch);
        }

        let (encrypted_payload, encryption_metadata) = seal(new_pin, payload)?;
        let pin_salt = hex::encode(random_bytes(SALT_LEN));

        self.pin_hash = salted_hash(&pin_salt, new_pin);
        self.pin_salt = pin_salt;
        self.encrypted_payload = encrypted_payload;
        self.encryption_metadata = encryption_metadata;
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.sync_version += 1;
        Ok(())
    }
}

/// Seal a payload under a PIN with a fresh salt and IV.
fn seal(pin: &str, payload: &VaultPayload) -> VaultResult<(String, EncryptionMetadata)> {
    let salt = random_bytes(SALT_LEN);
    let iv = random_bytes(IV_LEN);

    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;

    let key = derive_key(pin, &salt, VAULT_KDF_ITERATIONS);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
        .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;

    let metadata = EncryptionMetadata {
        algorithm: VAULT_ALGORITHM.to_string(),
        key_derivation: VAULT_KDF.to_string(),
        iterations: VAULT_KDF_ITERATIONS,
        salt_hex: hex::encode(salt),
        iv_hex: hex::encode(iv),
        version: VAULT_FORMAT_VERSION,
    };

    Ok((BASE64.encode(ciphertext), metadata))
}

fn derive_key(pin: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, iterations, &mut key);
    key
}

fn salted_hash(salt_hex: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Secret answers are matched case-insensitively with surrounding
/// whitespace ignored.
fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_payload() -> VaultPayload {
        VaultPayload {
            balance_minor: 125_000,
            history: vec![VaultHistoryEntry {
                id: "h1".to_string(),
                amount_minor: 25_000,
                description: "deposit".to_string(),
                occurred_at: 1_700_000_000_000,
            }],
        }
    }

    #[test]
    fn test_round_trip_under_correct_pin() {
        let payload = sample_payload();
        let record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &payload).unwrap();

        assert_eq!(record.open("4271").unwrap(), payload);
    }

    #[test]
    fn test_wrong_pin_is_a_distinguishable_failure() {
        let record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &sample_payload())
                .unwrap();

        assert!(matches!(record.open("0000"), Err(VaultError::DecryptFailed)));
    }

    #[test]
    fn test_payload_never_in_the_clear() {
        let payload = sample_payload();
        let record =
            EncryptedVaultRecord::create("user-1", "covert-pin-427193", "first pet", "Rex", &payload)
                .unwrap();

        let serialized = serde_json::to_string(&record).unwrap();
        assert!(!serialized.contains("balance_minor"));
        assert!(!serialized.contains("deposit"));
        assert!(!serialized.contains("covert-pin-427193"));
        assert!(!serialized.contains("Rex"));
        // The question itself is intentionally stored in the clear
        assert!(serialized.contains("first pet"));
    }

    #[test]
    fn test_corrupt_metadata_is_invalid_not_decrypt_failure() {
        let mut record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &sample_payload())
                .unwrap();
        record.encryption_metadata.salt_hex = "not hex".to_string();

        assert!(matches!(
            record.open("4271"),
            Err(VaultError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_update_payload_requires_pin_and_bumps_version() {
        let mut record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &sample_payload())
                .unwrap();
        let before = record.sync_version;

        let mut updated = sample_payload();
        updated.balance_minor = 99_000;

        assert!(matches!(
            record.update_payload("0000", &updated),
            Err(VaultError::PinMismatch)
        ));

        record.update_payload("4271", &updated).unwrap();
        assert_eq!(record.sync_version, before + 1);
        assert_eq!(record.open("4271").unwrap().balance_minor, 99_000);
    }

    #[test]
    fn test_reset_pin_via_secret_answer() {
        let payload = sample_payload();
        let mut record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &payload).unwrap();

        assert!(matches!(
            record.reset_pin("Fido", "9999", &payload),
            Err(VaultError::AnswerMismatch)
        ));

        // Answer matching ignores case and surrounding whitespace
        record.reset_pin("  rex ", "9999", &payload).unwrap();
        assert!(record.verify_pin("9999"));
        assert!(!record.verify_pin("4271"));
        assert_eq!(record.open("9999").unwrap(), payload);
        assert!(matches!(record.open("4271"), Err(VaultError::DecryptFailed)));
    }

    #[test]
    fn test_fresh_salt_and_iv_per_seal() {
        let payload = sample_payload();
        let mut record =
            EncryptedVaultRecord::create("user-1", "4271", "first pet", "Rex", &payload).unwrap();
        let first_meta = record.encryption_metadata.clone();

        record.update_payload("4271", &payload).unwrap();
        assert_ne!(record.encryption_metadata.salt_hex, first_meta.salt_hex);
        assert_ne!(record.encryption_metadata.iv_hex, first_meta.iv_hex);
    }
}
