use thiserror::Error;

/// Errors produced by the mahiro relay.
#[derive(Debug, Error)]
pub enum MahiroError {
    /// Startup configuration is missing or malformed.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// A gateway frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The gateway socket is not open.
    #[error("gateway not connected")]
    NotConnected,

    /// The control-plane call failed or reported a non-success result.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// An interceptor rejected the outbound message.
    #[error("send vetoed by interceptor `{interceptor}`")]
    Vetoed { interceptor: String },

    /// The secondary process could not be reached.
    #[error("forward target unreachable: {0}")]
    ForwardUnreachable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for MahiroError {
    fn from(e: serde_json::Error) -> Self {
        MahiroError::Decode(e.to_string())
    }
}

impl MahiroError {
    /// Short, stable label for the error kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::Decode(_) => "decode",
            Self::NotConnected => "not_connected",
            Self::SendFailed(_) => "send_failed",
            Self::Vetoed { .. } => "vetoed",
            Self::ForwardUnreachable(_) => "forward_unreachable",
            Self::Transport(_) => "transport",
        }
    }
}

pub type MahiroResult<T> = Result<T, MahiroError>;
