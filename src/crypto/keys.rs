//! Session key providers
//!
//! Secure key storage is platform territory; sessions only see this trait.

use crate::crypto::codec::SessionKey;
use crate::error::CryptoError;

/// Source of the group's symmetric session key
pub trait KeyProvider: Send + Sync {
    /// Key to use for the next connection
    fn session_key(&self) -> Result<SessionKey, CryptoError>;
}

/// Provider holding a single fixed key
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: SessionKey,
}

impl StaticKeyProvider {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    /// Provider with a freshly generated random key
    pub fn random() -> Result<Self, CryptoError> {
        Ok(Self::new(SessionKey::generate()?))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn session_key(&self) -> Result<SessionKey, CryptoError> {
        Ok(self.key.clone())
    }
}
