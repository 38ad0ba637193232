//! # Token Cipher
//!
//! At-rest encryption of tenant token material.
//!
//! Values are sealed with ChaCha20-Poly1305 and stored as a text envelope:
//!
//! ```text
//! enc:v1:<key_id>:<nonce_b64>:<ciphertext_b64>
//! ```
//!
//! Both base64 segments use the URL-safe alphabet without padding.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Encrypts and decrypts short secrets for storage.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// Errors produced by token encryption
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Invalid encryption key: {message}")]
    InvalidKey { message: String },

    #[error("Malformed envelope: {message}")]
    MalformedEnvelope { message: String },

    #[error("Key id '{key_id}' is not configured")]
    UnknownKey { key_id: String },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,
}

/// [`TokenCipher`] backed by ChaCha20-Poly1305 with a single static key.
pub struct ChaChaTokenCipher {
    key_id: String,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl ChaChaTokenCipher {
    /// Build from raw key bytes.
    pub fn new(key_id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        Self {
            key_id: key_id.into(),
            key: Zeroizing::new(key),
        }
    }

    /// Build from a base64 key (URL-safe or standard alphabet).
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] unless the value decodes to exactly
    /// 32 bytes.
    pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self, CipherError> {
        let encoded = encoded.trim();
        let decoded = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(encoded.as_bytes())
                .or_else(|_| STANDARD.decode(encoded.as_bytes()))
                .map_err(|e| CipherError::InvalidKey {
                    message: format!("not base64: {}", e),
                })?,
        );

        if decoded.len() != KEY_LEN {
            return Err(CipherError::InvalidKey {
                message: format!("expected {} bytes, got {}", KEY_LEN, decoded.len()),
            });
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Self::new(key_id, key))
    }

    /// Whether a stored value carries the envelope prefix.
    pub fn is_envelope(value: &str) -> bool {
        value.starts_with(ENVELOPE_PREFIX)
    }

    fn aead(&self) -> Result<ChaCha20Poly1305, CipherError> {
        ChaCha20Poly1305::new_from_slice(self.key.as_slice()).map_err(|e| {
            CipherError::InvalidKey {
                message: e.to_string(),
            }
        })
    }
}

impl fmt::Debug for ChaChaTokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaChaTokenCipher")
            .field("key_id", &self.key_id)
            .field("key", &"<REDACTED>")
            .finish()
    }
}

impl TokenCipher for ChaChaTokenCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce_source = Uuid::new_v4();
        let nonce_bytes = &nonce_source.as_bytes()[..NONCE_LEN];
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        Ok(format!(
            "{}{}:{}:{}",
            ENVELOPE_PREFIX,
            self.key_id,
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let body = ciphertext
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CipherError::MalformedEnvelope {
                message: "missing enc:v1 prefix".to_string(),
            })?;

        let parts: Vec<&str> = body.split(':').collect();
        let [key_id, nonce_b64, sealed_b64] = parts.as_slice() else {
            return Err(CipherError::MalformedEnvelope {
                message: format!("expected 3 segments after prefix, got {}", parts.len()),
            });
        };

        if *key_id != self.key_id {
            return Err(CipherError::UnknownKey {
                key_id: key_id.to_string(),
            });
        }

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|e| CipherError::MalformedEnvelope {
                message: format!("nonce: {}", e),
            })?;
        if nonce.len() != NONCE_LEN {
            return Err(CipherError::MalformedEnvelope {
                message: "nonce length is invalid".to_string(),
            });
        }
        let sealed =
            URL_SAFE_NO_PAD
                .decode(sealed_b64.as_bytes())
                .map_err(|e| CipherError::MalformedEnvelope {
                    message: format!("ciphertext: {}", e),
                })?;

        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
