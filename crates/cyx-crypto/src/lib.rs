//! Cryptographic primitives consumed by the cyxchat core.
//!
//! The cryptographic suite is fixed, matching spec §1's "out of scope as
//! primitives" list: Ed25519 for signing, X25519 for key agreement,
//! XChaCha20-Poly1305 for authenticated encryption, BLAKE2b for hashing
//! and key derivation, and RFC 4648 base32 for crypto-name rendering.
//!
//! - [`ed25519`] — identity signing keys (DNS records, mail)
//! - [`x25519`] — opportunistic peer key exchange, key sealing
//! - [`xchacha20`] — file payload encryption, sealed group/file keys
//! - [`blake2`] — domain-separated hashing and key derivation
//! - [`base32`] — crypto-name rendering

pub mod base32;
pub mod blake2;
pub mod ed25519;
pub mod x25519;
pub mod xchacha20;

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD decryption failed")]
    AeadDecryption,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
