//! Credential vault
//!
//! Encrypts tenant-supplied database credentials at rest with AES-256-GCM.
//! Stored form: `v1:` followed by base64 of `nonce || ciphertext || tag`.
//! The empty string is stored as the empty string.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::errors::{AppError, Result};

/// Prefix of every value produced by this vault
pub const CIPHERTEXT_PREFIX: &str = "v1:";

const NONCE_LEN: usize = 12;

/// Symmetric vault for credentials, keyed once at startup.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Derive the 256-bit key from the configured secret
    pub fn new(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt a credential. Empty input stays empty.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Internal {
                message: format!("credential encryption failed: {}", e),
            })?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            CIPHERTEXT_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(payload)
        ))
    }

    /// Decrypt a value produced by [`CredentialVault::encrypt`]. Empty input stays empty.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        if stored.is_empty() {
            return Ok(String::new());
        }

        let encoded = stored
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| decryption_error("unknown ciphertext format"))?;

        let payload = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| decryption_error("ciphertext is not valid base64"))?;

        if payload.len() <= NONCE_LEN {
            return Err(decryption_error("ciphertext too short"));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| decryption_error("authentication tag mismatch"))?;

        String::from_utf8(plaintext).map_err(|_| decryption_error("plaintext is not UTF-8"))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_opt(&self, stored: Option<&str>) -> Result<Option<String>> {
        stored.map(|s| self.decrypt(s)).transpose()
    }
}

fn decryption_error(message: &str) -> AppError {
    AppError::Decryption {
        message: message.to_string(),
    }
}
