//! XChaCha20-Poly1305 AEAD encryption.
//!
//! Used for file transfer payload encryption and for sealing group/file
//! keys for a specific recipient. The extended 24-byte nonce lets every
//! caller draw a fresh random nonce per encryption without a counter.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use chacha20poly1305::Key;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key`/`nonce`, authenticating `aad` alongside it.
pub fn encrypt(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XNonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Decrypt `ciphertext` (tag appended) under `key`/`nonce`, checking `aad`.
pub fn decrypt(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Encrypt without additional authenticated data.
pub fn encrypt_no_aad(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt(key, nonce, plaintext, &[])
}

/// Decrypt without additional authenticated data.
pub fn decrypt_no_aad(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    decrypt(key, nonce, ciphertext, &[])
}

/// Draw a fresh random key.
pub fn random_key() -> [u8; KEY_SIZE] {
    use rand::RngCore;
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Draw a fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// A short-lived symmetric key (group keys, file-transfer keys) that
/// zeroizes its bytes on drop, including on reassignment.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn random() -> Self {
        Self(random_key())
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];
        let plaintext = b"a file chunk's worth of bytes";
        let aad = b"file-id";

        let ciphertext = encrypt(&key, &nonce, plaintext, aad).expect("encrypt");
        let decrypted = decrypt(&key, &nonce, &ciphertext, aad).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn no_aad_roundtrip() {
        let key = random_key();
        let nonce = random_nonce();
        let ciphertext = encrypt_no_aad(&key, &nonce, b"test").expect("encrypt");
        assert_eq!(decrypt_no_aad(&key, &nonce, &ciphertext).expect("decrypt"), b"test");
    }

    #[test]
    fn ciphertext_has_tag() {
        let key = random_key();
        let nonce = random_nonce();
        let ciphertext = encrypt_no_aad(&key, &nonce, b"test").expect("encrypt");
        assert_eq!(ciphertext.len(), "test".len() + TAG_SIZE);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = random_key();
        let key2 = random_key();
        let nonce = random_nonce();
        let ciphertext = encrypt_no_aad(&key1, &nonce, b"test").expect("encrypt");
        assert!(decrypt_no_aad(&key2, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn wrong_nonce_fails() {
        let key = random_key();
        let nonce1 = random_nonce();
        let nonce2 = random_nonce();
        let ciphertext = encrypt_no_aad(&key, &nonce1, b"test").expect("encrypt");
        assert!(decrypt_no_aad(&key, &nonce2, &ciphertext).is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let key = random_key();
        let nonce = random_nonce();
        let ciphertext = encrypt(&key, &nonce, b"test", b"aad1").expect("encrypt");
        assert!(decrypt(&key, &nonce, &ciphertext, b"aad2").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = random_key();
        let nonce = random_nonce();
        let mut ciphertext = encrypt_no_aad(&key, &nonce, b"test").expect("encrypt");
        ciphertext[0] ^= 0xFF;
        assert!(decrypt_no_aad(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn empty_plaintext() {
        let key = random_key();
        let nonce = random_nonce();
        let ciphertext = encrypt_no_aad(&key, &nonce, b"").expect("encrypt");
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert!(decrypt_no_aad(&key, &nonce, &ciphertext).expect("decrypt").is_empty());
    }
}
