//! Best-effort relay of inbound events to the secondary process.
//!
//! The bridge is a pair of ordinary listeners. A failed delivery is logged
//! once per outage: the first failure warns, later ones stay at `debug`
//! until a delivery gets through again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mahiro_core::{MahiroError, MahiroResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::registry::{CancelHandle, ListenerRegistry};

pub const GROUP_PATH: &str = "/receive/group";
pub const FRIEND_PATH: &str = "/receive/friend";

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// 2xx with `{code: 200}`.
    Delivered,
    /// 2xx, but the secondary process answered with another code.
    Rejected { code: i64 },
    /// Unreachable, non-2xx, or unparsable reply. `warned` is true only for
    /// the first failure of an outage.
    Failed { warned: bool },
}

#[derive(Debug, Deserialize)]
struct ForwardReply {
    code: i64,
}

pub struct ForwardingBridge {
    http: reqwest::Client,
    base_url: String,
    last_failed: AtomicBool,
}

impl ForwardingBridge {
    pub fn new(base_url: impl Into<String>) -> MahiroResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .map_err(|e| MahiroError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_failed: AtomicBool::new(false),
        })
    }

    /// Bridge to a secondary process on `localhost:{port}`.
    pub fn for_port(port: u16) -> MahiroResult<Self> {
        Self::new(format!("http://localhost:{port}"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the last attempt failed.
    pub fn is_failing(&self) -> bool {
        self.last_failed.load(Ordering::SeqCst)
    }

    /// POST `event` to `{base}{path}`. Never returns an error; the outcome is
    /// only for observation.
    pub async fn forward<T: Serialize + ?Sized>(&self, path: &str, event: &T) -> ForwardOutcome {
        match self.post(path, event).await {
            Ok(reply) if reply.code == 200 => {
                self.mark_reachable();
                debug!(path = %path, "event forwarded");
                ForwardOutcome::Delivered
            }
            Ok(reply) => {
                self.mark_reachable();
                error!(path = %path, code = reply.code, "secondary process rejected event");
                ForwardOutcome::Rejected { code: reply.code }
            }
            Err(e) => self.mark_failed(path, &e),
        }
    }

    async fn post<T>(&self, path: &str, event: &T) -> MahiroResult<ForwardReply>
    where
        T: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| MahiroError::ForwardUnreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MahiroError::ForwardUnreachable(format!("{url}: HTTP {status}")));
        }
        response
            .json::<ForwardReply>()
            .await
            .map_err(|e| MahiroError::ForwardUnreachable(format!("{url}: malformed reply: {e}")))
    }

    fn mark_failed(&self, path: &str, err: &MahiroError) -> ForwardOutcome {
        let warned = !self.last_failed.swap(true, Ordering::SeqCst);
        if warned {
            warn!(path = %path, error = %err, "secondary process unreachable, suppressing repeats");
        } else {
            debug!(path = %path, error = %err, "secondary process still unreachable");
        }
        ForwardOutcome::Failed { warned }
    }

    fn mark_reachable(&self) {
        if self.last_failed.swap(false, Ordering::SeqCst) {
            info!(base_url = %self.base_url, "secondary process reachable again");
        }
    }

    /// Register the group and friend forwarding listeners.
    pub fn register(self: &Arc<Self>, registry: &ListenerRegistry) -> (CancelHandle, CancelHandle) {
        let bridge = Arc::clone(self);
        let group = registry.on_group("forward", move |event, _envelope| {
            let bridge = Arc::clone(&bridge);
            async move {
                bridge.forward(GROUP_PATH, &event).await;
                Ok(())
            }
        });

        let bridge = Arc::clone(self);
        let friend = registry.on_friend("forward", move |event, _envelope| {
            let bridge = Arc::clone(&bridge);
            async move {
                bridge.forward(FRIEND_PATH, &event).await;
                Ok(())
            }
        });
        (group, friend)
    }
}
