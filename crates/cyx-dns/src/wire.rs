//! DNS gossip frame codec (spec §4.5).

use crate::record::{DnsRecord, RECORD_LEN};

pub const DNS_REGISTER: u8 = 0xD0;
pub const DNS_REGISTER_ACK: u8 = 0xD1;
pub const DNS_LOOKUP: u8 = 0xD2;
pub const DNS_RESPONSE: u8 = 0xD3;
pub const DNS_UPDATE: u8 = 0xD4;
pub const DNS_UPDATE_ACK: u8 = 0xD5;
pub const DNS_ANNOUNCE: u8 = 0xD6;

#[derive(Debug, Clone)]
pub enum DnsFrame {
    Register { record: DnsRecord, hops: u8 },
    RegisterAck { success: bool },
    Lookup { query_id: u8, name: String },
    Response { query_id: u8, record: Option<DnsRecord> },
    Update { record: DnsRecord, hops: u8 },
    UpdateAck { success: bool },
    Announce { record: DnsRecord },
}

impl DnsFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            DnsFrame::Register { record, hops } => {
                let mut out = vec![DNS_REGISTER];
                out.extend_from_slice(&record.to_bytes());
                out.push(*hops);
                out
            }
            DnsFrame::RegisterAck { success } => vec![DNS_REGISTER_ACK, *success as u8],
            DnsFrame::Lookup { query_id, name } => {
                let mut out = vec![DNS_LOOKUP, *query_id];
                let name_bytes = name.as_bytes();
                out.push(name_bytes.len() as u8);
                out.extend_from_slice(name_bytes);
                out
            }
            DnsFrame::Response { query_id, record } => {
                let mut out = vec![DNS_RESPONSE, *query_id];
                match record {
                    Some(r) => {
                        out.push(1);
                        out.extend_from_slice(&r.to_bytes());
                    }
                    None => out.push(0),
                }
                out
            }
            DnsFrame::Update { record, hops } => {
                let mut out = vec![DNS_UPDATE];
                out.extend_from_slice(&record.to_bytes());
                out.push(*hops);
                out
            }
            DnsFrame::UpdateAck { success } => vec![DNS_UPDATE_ACK, *success as u8],
            DnsFrame::Announce { record } => {
                let mut out = vec![DNS_ANNOUNCE];
                out.extend_from_slice(&record.to_bytes());
                out
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&type_byte, rest) = data.split_first()?;
        match type_byte {
            DNS_REGISTER => {
                let record = DnsRecord::from_bytes(rest.get(0..RECORD_LEN)?)?;
                let hops = *rest.get(RECORD_LEN)?;
                Some(DnsFrame::Register { record, hops })
            }
            DNS_REGISTER_ACK => Some(DnsFrame::RegisterAck {
                success: *rest.first()? != 0,
            }),
            DNS_LOOKUP => {
                let query_id = *rest.first()?;
                let len = *rest.get(1)? as usize;
                let name = String::from_utf8(rest.get(2..2 + len)?.to_vec()).ok()?;
                Some(DnsFrame::Lookup { query_id, name })
            }
            DNS_RESPONSE => {
                let query_id = *rest.first()?;
                let present = *rest.get(1)?;
                let record = if present != 0 {
                    Some(DnsRecord::from_bytes(rest.get(2..2 + RECORD_LEN)?)?)
                } else {
                    None
                };
                Some(DnsFrame::Response { query_id, record })
            }
            DNS_UPDATE => {
                let record = DnsRecord::from_bytes(rest.get(0..RECORD_LEN)?)?;
                let hops = *rest.get(RECORD_LEN)?;
                Some(DnsFrame::Update { record, hops })
            }
            DNS_UPDATE_ACK => Some(DnsFrame::UpdateAck {
                success: *rest.first()? != 0,
            }),
            DNS_ANNOUNCE => {
                let record = DnsRecord::from_bytes(rest.get(0..RECORD_LEN)?)?;
                Some(DnsFrame::Announce { record })
            }
            _ => None,
        }
    }
}
