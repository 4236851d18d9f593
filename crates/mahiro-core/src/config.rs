//! Gateway address: the two accepted configuration shapes.

use crate::error::{MahiroError, MahiroResult};

pub const DEFAULT_GATEWAY_HOST: &str = "0.0.0.0";
pub const DEFAULT_GATEWAY_PORT: u16 = 8086;

/// Where the gateway lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAddress {
    /// Host and port; the socket URL is `ws://{host}:{port}/ws`.
    HostPort { host: String, port: u16 },
    /// Explicit socket URL (`ws://` or `wss://`).
    Url(String),
}

impl GatewayAddress {
    /// Build from optional config parts. Exactly one form must be supplied.
    ///
    /// A lone `host` or `port` selects the host/port form and the missing
    /// half takes its default.
    pub fn from_parts(
        host: Option<&str>,
        port: Option<u16>,
        url: Option<&str>,
    ) -> MahiroResult<Self> {
        let host = host.map(str::trim).filter(|h| !h.is_empty());
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let simple = host.is_some() || port.is_some();

        match (simple, url) {
            (true, Some(_)) => Err(MahiroError::ConfigInvalid(
                "gateway: give either host/port or ws url, not both".into(),
            )),
            (false, None) => Err(MahiroError::ConfigInvalid(
                "gateway: one of host/port or ws url is required".into(),
            )),
            (false, Some(u)) => Self::url(u),
            (true, None) => Self::host_port(
                host.unwrap_or(DEFAULT_GATEWAY_HOST),
                port.unwrap_or(DEFAULT_GATEWAY_PORT),
            ),
        }
    }

    pub fn host_port(host: &str, port: u16) -> MahiroResult<Self> {
        if host.is_empty() || host.contains('/') || host.contains(' ') {
            return Err(MahiroError::ConfigInvalid(format!("gateway: invalid host `{host}`")));
        }
        if port == 0 {
            return Err(MahiroError::ConfigInvalid("gateway: port must be non-zero".into()));
        }
        Ok(Self::HostPort {
            host: host.to_string(),
            port,
        })
    }

    pub fn url(url: &str) -> MahiroResult<Self> {
        let rest = strip_ws_scheme(url).ok_or_else(|| {
            MahiroError::ConfigInvalid(format!("gateway: `{url}` must start with ws:// or wss://"))
        })?;
        if authority(rest).is_empty() {
            return Err(MahiroError::ConfigInvalid(format!("gateway: `{url}` has no host")));
        }
        Ok(Self::Url(url.to_string()))
    }

    /// Event socket URL.
    pub fn socket_url(&self) -> String {
        match self {
            Self::HostPort { host, port } => format!("ws://{host}:{port}/ws"),
            Self::Url(url) => url.clone(),
        }
    }

    /// Base URL of the HTTP control endpoint on the same host and port.
    pub fn control_base_url(&self) -> String {
        match self {
            Self::HostPort { host, port } => format!("http://{host}:{port}"),
            Self::Url(url) => {
                let secure = url.to_ascii_lowercase().starts_with("wss://");
                let rest = strip_ws_scheme(url).unwrap_or(url);
                let scheme = if secure { "https" } else { "http" };
                format!("{scheme}://{}", authority(rest))
            }
        }
    }
}

fn strip_ws_scheme(url: &str) -> Option<&str> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("ws://") {
        Some(&url[5..])
    } else if lower.starts_with("wss://") {
        Some(&url[6..])
    } else {
        None
    }
}

/// `host[:port]` part of a scheme-less URL.
fn authority(rest: &str) -> &str {
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}
