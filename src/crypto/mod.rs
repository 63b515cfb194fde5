//! Per-packet authenticated encryption

pub mod codec;
pub mod keys;

pub use codec::{CryptoCodec, SessionKey};
pub use keys::{KeyProvider, StaticKeyProvider};
