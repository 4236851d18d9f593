//! Gateway control plane: request/response send calls over HTTP.
//!
//! Distinct from the event socket. The pipeline only sees the
//! [`ControlPlane`] trait so it can be driven without a live gateway.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use mahiro_core::send::FUNC_NAME;
use mahiro_core::{MahiroError, MahiroResult, SendApiPayload, SendResponse};
use tracing::{debug, error};

/// Boxed future returned by [`ControlPlane::call`].
pub type ControlFuture<'a> = Pin<Box<dyn Future<Output = MahiroResult<SendResponse>> + Send + 'a>>;

/// Where outbound sends go.
pub trait ControlPlane: Send + Sync {
    /// Whether the gateway is currently reachable for sends.
    fn is_open(&self) -> bool;

    /// Issue one send call and wait for the gateway's answer.
    fn call<'a>(&'a self, payload: &'a SendApiPayload) -> ControlFuture<'a>;
}

/// HTTP client for `POST {base}/v1/LuaApiCaller`.
#[derive(Debug, Clone)]
pub struct HttpControl {
    http: reqwest::Client,
    base_url: String,
    bot_id: i64,
    /// Gateway-side timeout passed as the `timeout` query parameter, in seconds.
    gateway_timeout_secs: u64,
}

impl HttpControl {
    pub fn new(base_url: impl Into<String>, bot_id: i64, timeout: Duration) -> MahiroResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(2))
            .build()
            .map_err(|e| MahiroError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_id,
            gateway_timeout_secs: timeout.as_secs().max(1),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/LuaApiCaller", self.base_url)
    }

    /// Send one payload. Non-2xx statuses, unparsable bodies, and a non-zero
    /// `CgiBaseResponse.Ret` are all `SendFailed`.
    pub async fn send(&self, payload: &SendApiPayload) -> MahiroResult<SendResponse> {
        let timeout = self.gateway_timeout_secs.to_string();
        let qq = self.bot_id.to_string();
        let url = self.endpoint();
        debug!(url = %url, to = payload.cgi_request.to_uin, "control-plane call");

        let response = self
            .http
            .post(&url)
            .query(&[
                ("funcname", FUNC_NAME),
                ("timeout", timeout.as_str()),
                ("qq", qq.as_str()),
            ])
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "control-plane request failed");
                MahiroError::SendFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "control-plane returned error status");
            return Err(MahiroError::SendFailed(format!("gateway returned {status}: {body}")));
        }

        let result: SendResponse = response.json().await.map_err(|e| {
            error!(error = %e, "control-plane response not understood");
            MahiroError::SendFailed(format!("malformed response: {e}"))
        })?;

        if let Some(reason) = result.failure_reason() {
            error!(reason = %reason, "gateway rejected send");
            return Err(MahiroError::SendFailed(reason));
        }
        Ok(result)
    }
}
