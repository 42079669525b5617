//! Presence wire frames (spec §4.8, §C.4).

pub const PRESENCE_STATUS: u8 = 0x30;
pub const PRESENCE_QUERY: u8 = 0x31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Online,
    Away,
    Busy,
    Offline,
}

impl Status {
    fn to_byte(self) -> u8 {
        match self {
            Status::Online => 0,
            Status::Away => 1,
            Status::Busy => 2,
            Status::Offline => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Status::Online),
            1 => Some(Status::Away),
            2 => Some(Status::Busy),
            3 => Some(Status::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceFrame {
    Status { status: Status, text: String },
    Query,
}

impl PresenceFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PresenceFrame::Status { status, text } => {
                let mut out = vec![PRESENCE_STATUS, status.to_byte()];
                let text_bytes = text.as_bytes();
                out.push(text_bytes.len().min(255) as u8);
                out.extend_from_slice(&text_bytes[..text_bytes.len().min(255)]);
                out
            }
            PresenceFrame::Query => vec![PRESENCE_QUERY],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&type_byte, rest) = data.split_first()?;
        match type_byte {
            PRESENCE_STATUS => {
                let status = Status::from_byte(*rest.first()?)?;
                let len = *rest.get(1)? as usize;
                let text = String::from_utf8(rest.get(2..2 + len)?.to_vec()).ok()?;
                Some(PresenceFrame::Status { status, text })
            }
            PRESENCE_QUERY => Some(PresenceFrame::Query),
            _ => None,
        }
    }
}
