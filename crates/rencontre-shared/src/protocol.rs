use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConnId, SessionId};

/// Events a client may send over its WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Enter the waiting pool and look for a partner.
    JoinWaiting,

    /// Explicitly end the current session (the connection stays open).
    Leave,

    /// Advisory typing indicator, forwarded to the partner.
    TypingStart,
    TypingStop,

    /// A chat message for the current partner.
    SendMessage { content: String },
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Ack: the caller is queued and no eligible partner exists yet.
    Waiting,

    /// A session was created. `partner` is the partner's transient
    /// connection handle -- never their persistent identity.
    Matched {
        session_id: SessionId,
        partner: ConnId,
    },

    /// The partner's current typing state (last-write-wins, best-effort).
    PartnerTyping { typing: bool },

    /// A chat message relayed from the partner.
    Message {
        sender: ConnId,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// The session is over.
    Ended { reason: EndReason },

    /// Generic failure. Policy rejections deliberately use this shape so
    /// that block state is never disclosed.
    Error { message: String },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    PartnerLeft,
    Disconnected,
    Blocked,
}
