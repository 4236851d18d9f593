//! mahiro-core: shared protocol library for the mahiro relay.
//!
//! Provides the gateway envelope types and codec, classified domain events,
//! outbound send payloads, gateway address validation, and the error type
//! shared by the client and server crates.

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod send;

// Re-export commonly used items at crate root.
pub use codec::{decode, decode_str};
pub use config::GatewayAddress;
pub use envelope::{Envelope, MsgBody, MsgHead, Tag, EVENT_NEW_MESSAGE};
pub use error::{MahiroError, MahiroResult};
pub use events::{Category, FriendMessageEvent, GroupMessageEvent};
pub use send::{
    ImageRef, Mention, MessagePayload, SendApiPayload, SendRequest, SendResponse, Target,
    TargetKind,
};
