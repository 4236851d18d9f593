//! Domain events: classified inbound messages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::{MsgBody, MsgHead};
use crate::error::{MahiroError, MahiroResult};

/// Event category a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Group,
    Friend,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Group => "group",
            Category::Friend => "friend",
        }
    }

    /// Classify a message head by its `(FromType, MsgType, C2cCmd)` triple.
    ///
    /// Returns `None` for every other triple; the gateway carries many event
    /// kinds this relay does not subscribe to.
    pub fn classify(head: &MsgHead) -> Option<Category> {
        let (Some(from), Some(kind), Some(cmd)) =
            (head.from_type.as_ref(), head.msg_type.as_ref(), head.c2c_cmd.as_ref())
        else {
            return None;
        };

        const GROUP: &[&str] = &["group"];
        const FRIEND: &[&str] = &["friend", "friends"];

        if from.is(2, GROUP) && kind.is(82, GROUP) && cmd.is(0, GROUP) {
            Some(Category::Group)
        } else if from.is(1, FRIEND) && kind.is(166, FRIEND) && cmd.is(11, FRIEND) {
            Some(Category::Friend)
        } else {
            None
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received in a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageEvent {
    pub group_id: i64,
    pub group_name: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: MsgBody,
}

impl GroupMessageEvent {
    pub fn from_parts(head: &MsgHead, body: Option<&MsgBody>) -> MahiroResult<Self> {
        let group = head
            .group_info
            .as_ref()
            .ok_or_else(|| MahiroError::Decode("group message without GroupInfo".into()))?;
        Ok(Self {
            group_id: group.group_code,
            group_name: group.group_name.clone(),
            sender_id: sender_id(head)?,
            sender_name: head.sender_nick.clone().unwrap_or_default(),
            body: body.cloned().unwrap_or_default(),
        })
    }
}

/// A direct message from a friend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendMessageEvent {
    pub sender_id: i64,
    pub sender_name: String,
    pub body: MsgBody,
}

impl FriendMessageEvent {
    pub fn from_parts(head: &MsgHead, body: Option<&MsgBody>) -> MahiroResult<Self> {
        Ok(Self {
            sender_id: sender_id(head)?,
            sender_name: head.sender_nick.clone().unwrap_or_default(),
            body: body.cloned().unwrap_or_default(),
        })
    }
}

fn sender_id(head: &MsgHead) -> MahiroResult<i64> {
    head.sender_uin
        .ok_or_else(|| MahiroError::Decode("message without SenderUin".into()))
}
