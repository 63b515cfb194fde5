//! AES-256-GCM frame codec
//!
//! Every payload, audio or telemetry, travels as
//!
//! ```text
//! [nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]
//! ```
//!
//! Text transports carry the same frame base64-encoded.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::constants::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;

/// Symmetric 256-bit session key
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(bytes.len()))?;
        Ok(Self(key))
    }

    /// Fresh random key from the OS generator
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Stateless AEAD codec bound to one key
pub struct CryptoCodec {
    cipher: Aes256Gcm,
}

impl CryptoCodec {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// Fails with [`CryptoError::RandomUnavailable`] rather than ever
    /// falling back to a predictable nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    /// Decrypt a `nonce || ciphertext || tag` frame
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(framed.len()));
        }

        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthFailure)
    }

    /// Encrypt and base64-encode for text transports
    pub fn encrypt_text(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        Ok(BASE64.encode(self.encrypt(plaintext)?))
    }

    /// Reverse of [`encrypt_text`](Self::encrypt_text). Bad base64 counts as
    /// a failed integrity check.
    pub fn decrypt_text(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let framed = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::AuthFailure)?;
        self.decrypt(&framed)
    }
}

/// Size of a framed ciphertext for a plaintext of `len` bytes
pub const fn framed_len(len: usize) -> usize {
    NONCE_LEN + len + TAG_LEN
}
