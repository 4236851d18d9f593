//! Outbound message types and the gateway control-plane payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `funcname` query parameter of the control endpoint.
pub const FUNC_NAME: &str = "MagicCgiCmd";
/// `CgiCmd` of a send call.
pub const SEND_CMD: &str = "MagicCgiCmd.send";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Group,
    Friend,
}

impl TargetKind {
    /// `ToType` code understood by the gateway.
    pub fn to_type(self) -> i64 {
        match self {
            TargetKind::Friend => 1,
            TargetKind::Group => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Group => "group",
            TargetKind::Friend => "friend",
        }
    }
}

/// Conversation an outbound message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub kind: TargetKind,
}

impl Target {
    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: TargetKind::Group,
        }
    }

    pub fn friend(id: i64) -> Self {
        Self {
            id,
            kind: TargetKind::Friend,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// An image already uploaded to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRef {
    pub file_id: i64,
    pub file_md5: String,
    pub file_size: i64,
}

/// An `@` mention in an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mention {
    pub uin: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

/// Message content. Serializes with the gateway's field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "Content", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "AtUinLists", default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<Mention>>,
    #[serde(rename = "Images", default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageRef>>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// True when there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
            && self.mentions.as_ref().map_or(true, Vec::is_empty)
            && self.images.as_ref().map_or(true, Vec::is_empty)
    }

    /// First `max` characters of the text, for log lines.
    pub fn preview(&self, max: usize) -> String {
        self.text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(max)
            .collect()
    }
}

/// A caller's request to send one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub target: Target,
    pub content: MessagePayload,
}

impl SendRequest {
    pub fn new(target: Target, content: MessagePayload) -> Self {
        Self { target, content }
    }
}

/// `CgiRequest` member of a send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgiRequest {
    #[serde(rename = "ToUin")]
    pub to_uin: i64,
    #[serde(rename = "ToType")]
    pub to_type: i64,
    #[serde(flatten)]
    pub content: MessagePayload,
}

/// Body of a control-plane send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendApiPayload {
    #[serde(rename = "CgiCmd")]
    pub cgi_cmd: String,
    #[serde(rename = "CgiRequest")]
    pub cgi_request: CgiRequest,
}

impl SendApiPayload {
    pub fn for_request(request: &SendRequest) -> Self {
        Self {
            cgi_cmd: SEND_CMD.to_string(),
            cgi_request: CgiRequest {
                to_uin: request.target.id,
                to_type: request.target.kind.to_type(),
                content: request.content.clone(),
            },
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.cgi_request.content.text.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgiBaseResponse {
    #[serde(rename = "Ret")]
    pub ret: i64,
    #[serde(rename = "ErrMsg", default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

/// Control-plane response. Only the success indicator is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(rename = "CgiBaseResponse", default, skip_serializing_if = "Option::is_none")]
    pub cgi_base_response: Option<CgiBaseResponse>,
    #[serde(rename = "ResponseData", default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SendResponse {
    pub fn is_success(&self) -> bool {
        self.cgi_base_response.as_ref().map_or(true, |r| r.ret == 0)
    }

    /// Human-readable failure reason, if the response reports one.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.cgi_base_response {
            Some(r) if r.ret != 0 => Some(match &r.err_msg {
                Some(msg) if !msg.is_empty() => format!("Ret={} {}", r.ret, msg),
                _ => format!("Ret={}", r.ret),
            }),
            _ => None,
        }
    }
}
