//! Name validation, normalization, and crypto-name derivation (spec §4.5).

use cyx_crypto::base32;
use cyx_crypto::blake2::{self, contexts};
use cyx_crypto::ed25519::VerifyingKey;
use cyx_types::NodeId;

pub const MAX_NAME_LEN: usize = 63;
pub const MIN_NAME_LEN: usize = 3;
pub const SUFFIX: &str = ".cyx";
pub const CRYPTO_NAME_LEN: usize = 8;

/// Strip the optional `.cyx` suffix and lowercase.
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    lower.strip_suffix(SUFFIX).unwrap_or(&lower).to_string()
}

/// `[A-Za-z0-9_]`, length 3..63, first char alphabetic, no consecutive
/// underscores, no trailing underscore. Applied after normalization.
pub fn validate(normalized: &str) -> bool {
    let len = normalized.len();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return false;
    }
    let bytes = normalized.as_bytes();
    if !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    if bytes.last() == Some(&b'_') {
        return false;
    }
    let mut prev_underscore = false;
    for &b in bytes {
        let ok = b.is_ascii_alphanumeric() || b == b'_';
        if !ok {
            return false;
        }
        if b == b'_' {
            if prev_underscore {
                return false;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
    }
    true
}

/// `crypto_name(pk) = base32(BLAKE2b(pk)[0..5])`, exactly 8 chars, `[a-z2-7]`.
pub fn crypto_name(pk: &VerifyingKey) -> String {
    let hash = blake2::derive(contexts::CRYPTO_NAME, pk.as_bytes());
    base32::encode(&hash[0..5])
}

/// A crypto-name resolves directly to a locally-derived NodeId with no
/// network round trip.
pub fn is_crypto_name(name: &str) -> bool {
    name.len() == CRYPTO_NAME_LEN && name.bytes().all(|b| (b'a'..=b'z').contains(&b) || (b'2'..=b'7').contains(&b))
}

/// Resolve a crypto-name back to a NodeId, purely locally. Caller supplies
/// the candidate public key (crypto-names are not reversible; this is used
/// when the caller already knows the key and wants to confirm the name, or
/// when a contact share carries both).
pub fn node_id_for_crypto_name(pk: &VerifyingKey) -> NodeId {
    NodeId(cyx_crypto::ed25519::derive_node_id(pk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_crypto::ed25519::KeyPair;

    #[test]
    fn normalize_strips_suffix_and_lowercases() {
        assert_eq!(normalize("Alice.cyx"), "alice");
        assert_eq!(normalize("BOB"), "bob");
    }

    #[test]
    fn validate_accepts_reasonable_names() {
        assert!(validate("alice"));
        assert!(validate("al_ice9"));
    }

    #[test]
    fn validate_rejects_bad_names() {
        assert!(!validate("ab")); // too short
        assert!(!validate("9alice")); // starts with digit
        assert!(!validate("alice_")); // trailing underscore
        assert!(!validate("al__ice")); // consecutive underscores
        assert!(!validate("al.ice")); // invalid char
    }

    #[test]
    fn crypto_name_is_deterministic_and_matches_alphabet() {
        let kp = KeyPair::generate();
        let name = crypto_name(&kp.verifying_key);
        assert_eq!(name.len(), CRYPTO_NAME_LEN);
        assert!(is_crypto_name(&name));
        assert_eq!(name, crypto_name(&kp.verifying_key));
    }

    #[test]
    fn regular_name_is_not_a_crypto_name() {
        assert!(!is_crypto_name("alice"));
    }
}
