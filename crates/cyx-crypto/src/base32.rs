//! RFC 4648 base32 encoding (no padding, lowercase), used for crypto-name
//! derivation. `data-encoding`'s standard base32 alphabet is uppercase; we
//! lowercase on encode and uppercase on decode to present the `[a-z2-7]`
//! alphabet the DNS engine's name rules require.

use data_encoding::BASE32_NOPAD;

pub fn encode(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data).to_ascii_lowercase()
}

pub fn decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    BASE32_NOPAD.decode(s.to_ascii_uppercase().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01];
        let encoded = encode(&data);
        assert_eq!(encoded, encoded.to_ascii_lowercase());
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn alphabet_is_lowercase_a_to_z_2_to_7() {
        let encoded = encode(&[0xff; 5]);
        assert!(encoded.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')));
    }
}
