//! Fixed-width wire identifiers shared by every engine.
//!
//! All identifiers are compared bytewise and rendered as lowercase,
//! zero-padded hex with no prefix. An all-zero value denotes "absent".

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! fixed_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            /// All-zero id (the wire's "absent" sentinel).
            pub const ZERO: Self = Self([0u8; $len]);

            /// Generate a random id via the supplied RNG.
            pub fn random<R: rand::RngCore>(rng: &mut R) -> Self {
                let mut bytes = [0u8; $len];
                rng.fill_bytes(&mut bytes);
                Self(bytes)
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, IdError> {
                let bytes = hex::decode(s).map_err(|_| IdError::Malformed)?;
                if bytes.len() != $len {
                    return Err(IdError::WrongLength {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

fixed_id!(NodeId, 32);
fixed_id!(MsgId, 8);
fixed_id!(GroupId, 8);
fixed_id!(FileId, 8);
fixed_id!(MailId, 8);

/// Error from parsing a hex-encoded identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("malformed hex string")]
    Malformed,
    #[error("wrong id length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}
