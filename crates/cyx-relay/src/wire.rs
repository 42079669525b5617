//! Relay protocol frame codec (spec §4.2, §6).
//!
//! Relay frames are the first byte of a raw transport datagram; they are
//! never onion-wrapped, since the relay server itself must be able to read
//! `to` in order to route. The `0xE0..0xE5` range is disjoint from the
//! mail type-byte range at a different layer (spec §6): a relay byte is
//! only meaningful as the first byte handed up from [`cyx_transport`];
//! mail bytes are only meaningful after onion decryption.

use cyx_types::NodeId;

pub const CONNECT: u8 = 0xE0;
pub const CONNECT_ACK: u8 = 0xE1;
pub const DISCONNECT: u8 = 0xE2;
pub const DATA: u8 = 0xE3;
pub const KEEPALIVE: u8 = 0xE4;
pub const ERROR: u8 = 0xE5;

#[derive(Debug, Clone)]
pub enum RelayFrame {
    Connect { from: NodeId, to: NodeId },
    ConnectAck { to: NodeId },
    Disconnect { peer: NodeId },
    Data { from: NodeId, to: NodeId, payload: Vec<u8> },
    Keepalive { peer: NodeId },
    Error { peer: NodeId, code: u8 },
}

impl RelayFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RelayFrame::Connect { from, to } => {
                let mut out = vec![CONNECT];
                out.extend_from_slice(from.as_bytes());
                out.extend_from_slice(to.as_bytes());
                out
            }
            RelayFrame::ConnectAck { to } => {
                let mut out = vec![CONNECT_ACK];
                out.extend_from_slice(to.as_bytes());
                out
            }
            RelayFrame::Disconnect { peer } => {
                let mut out = vec![DISCONNECT];
                out.extend_from_slice(peer.as_bytes());
                out
            }
            RelayFrame::Data { from, to, payload } => {
                let mut out = vec![DATA];
                out.extend_from_slice(from.as_bytes());
                out.extend_from_slice(to.as_bytes());
                out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
                out.extend_from_slice(payload);
                out
            }
            RelayFrame::Keepalive { peer } => {
                let mut out = vec![KEEPALIVE];
                out.extend_from_slice(peer.as_bytes());
                out
            }
            RelayFrame::Error { peer, code } => {
                let mut out = vec![ERROR];
                out.extend_from_slice(peer.as_bytes());
                out.push(*code);
                out
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (type_byte, rest) = data.split_first()?;
        match *type_byte {
            CONNECT => {
                if rest.len() != 64 {
                    return None;
                }
                Some(RelayFrame::Connect {
                    from: node_id(&rest[0..32])?,
                    to: node_id(&rest[32..64])?,
                })
            }
            CONNECT_ACK => Some(RelayFrame::ConnectAck { to: node_id(rest)? }),
            DISCONNECT => Some(RelayFrame::Disconnect { peer: node_id(rest)? }),
            DATA => {
                if rest.len() < 66 {
                    return None;
                }
                let from = node_id(&rest[0..32])?;
                let to = node_id(&rest[32..64])?;
                let len = u16::from_le_bytes([rest[64], rest[65]]) as usize;
                let payload = rest.get(66..66 + len)?.to_vec();
                Some(RelayFrame::Data { from, to, payload })
            }
            KEEPALIVE => Some(RelayFrame::Keepalive { peer: node_id(rest)? }),
            ERROR => {
                if rest.len() != 33 {
                    return None;
                }
                Some(RelayFrame::Error {
                    peer: node_id(&rest[0..32])?,
                    code: rest[32],
                })
            }
            _ => None,
        }
    }
}

fn node_id(bytes: &[u8]) -> Option<NodeId> {
    if bytes.len() != 32 {
        return None;
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Some(NodeId(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn connect_round_trip() {
        let frame = RelayFrame::Connect {
            from: NodeId::random(&mut OsRng),
            to: NodeId::random(&mut OsRng),
        };
        let bytes = frame.to_bytes();
        let decoded = RelayFrame::from_bytes(&bytes).unwrap();
        match decoded {
            RelayFrame::Connect { from, to } => match &frame {
                RelayFrame::Connect { from: f2, to: t2 } => {
                    assert_eq!(from, *f2);
                    assert_eq!(to, *t2);
                }
                _ => unreachable!(),
            },
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn data_round_trip() {
        let frame = RelayFrame::Data {
            from: NodeId::random(&mut OsRng),
            to: NodeId::random(&mut OsRng),
            payload: b"opaque onion ciphertext".to_vec(),
        };
        let bytes = frame.to_bytes();
        assert_eq!(bytes[0], DATA);
        match RelayFrame::from_bytes(&bytes).unwrap() {
            RelayFrame::Data { payload, .. } => assert_eq!(payload, b"opaque onion ciphertext"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn truncated_data_frame_rejected() {
        let mut bytes = RelayFrame::Data {
            from: NodeId::random(&mut OsRng),
            to: NodeId::random(&mut OsRng),
            payload: vec![1, 2, 3],
        }
        .to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(RelayFrame::from_bytes(&bytes).is_none());
    }

    #[test]
    fn unknown_type_byte_rejected() {
        assert!(RelayFrame::from_bytes(&[0xFF, 0, 0]).is_none());
    }
}
