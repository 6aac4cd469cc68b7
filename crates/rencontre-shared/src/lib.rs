//! # rencontre-shared
//!
//! Types shared between the Rencontre relay server and its clients:
//! opaque identifiers, the WebSocket wire protocol, and the signed identity
//! token presented at connect time.

pub mod constants;
pub mod identity;
pub mod protocol;
pub mod types;

pub use protocol::{ClientEvent, EndReason, ServerEvent};
pub use types::{ConnId, SessionId, UserId};
