//! Shared identifier types used across the cyxchat workspace.

pub mod ids;

pub use ids::{FileId, GroupId, IdError, MailId, MsgId, NodeId};
