//! Gateway wire types.
//!
//! Every socket frame is a JSON object of the shape
//! `{CurrentQQ, CurrentPacket: {EventName, EventData: {MsgHead, MsgBody}}}`.
//! Fields this relay does not interpret are kept in `extra` maps so the raw
//! envelope handed to listeners loses nothing.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The only gateway event this relay processes.
pub const EVENT_NEW_MESSAGE: &str = "ON_EVENT_QQNT_NEW_MSG";

/// A decoded gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Bot identity the gateway delivered this frame for.
    #[serde(rename = "CurrentQQ")]
    pub current_qq: i64,
    #[serde(rename = "CurrentPacket")]
    pub current_packet: Packet,
}

impl Envelope {
    pub fn source_identity(&self) -> i64 {
        self.current_qq
    }

    pub fn event_name(&self) -> &str {
        &self.current_packet.event_name
    }

    pub fn head(&self) -> Option<&MsgHead> {
        self.current_packet.event_data.msg_head.as_ref()
    }

    pub fn body(&self) -> Option<&MsgBody> {
        self.current_packet.event_data.msg_body.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Packet {
    pub event_name: String,
    #[serde(default)]
    pub event_data: EventData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_head: Option<MsgHead>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_body: Option<MsgBody>,
}

/// Classification and sender fields of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MsgHead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_uin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_uin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_type: Option<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c2c_cmd: Option<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_uin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_info: Option<GroupInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub group_code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message content.
///
/// Absent and `null` fields both decode to "not present" and are never
/// serialized back as `null`. Mentions and images stay untyped so that
/// whatever the gateway sends inside them passes through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MsgBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_msg_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_uin_lists: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A head classification field as the gateway sends it: either the numeric
/// protocol code or a symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Code(i64),
    Name(String),
}

impl Tag {
    /// Whether this tag denotes `code` or any of `names` (case-insensitive).
    pub fn is(&self, code: i64, names: &[&str]) -> bool {
        match self {
            Tag::Code(c) => *c == code,
            Tag::Name(n) => names.iter().any(|name| n.eq_ignore_ascii_case(name)),
        }
    }
}
