//! Inbound HTTP surface: send requests from the secondary process.
//!
//! Every reply is `{code}`: 200 when the message went out, 500 for anything
//! else (bad body, wrong bot, veto, gateway down, send failure).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use mahiro_client::OutboundPipeline;
use mahiro_core::{MahiroError, MahiroResult, MessagePayload, SendRequest, Target};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const GROUP_ENDPOINT: &str = "/api/v1/receive/group";
pub const FRIEND_ENDPOINT: &str = "/api/v1/receive/friend";

#[derive(Clone)]
pub struct AppState {
    pub bot_id: i64,
    pub pipeline: Arc<OutboundPipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupSendBody {
    group_id: i64,
    msg: MessagePayload,
    #[serde(default)]
    qq: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FriendSendBody {
    user_id: i64,
    msg: MessagePayload,
    #[serde(default)]
    qq: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeReply {
    pub code: u16,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(GROUP_ENDPOINT, post(receive_group))
        .route(FRIEND_ENDPOINT, post(receive_friend))
        .with_state(state)
}

async fn receive_group(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<CodeReply>) {
    let request = parse::<GroupSendBody>(&body).and_then(|b| {
        check_bot(&state, b.qq)?;
        Ok(SendRequest::new(Target::group(b.group_id), b.msg))
    });
    reply(&state, request).await
}

async fn receive_friend(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<CodeReply>) {
    let request = parse::<FriendSendBody>(&body).and_then(|b| {
        check_bot(&state, b.qq)?;
        Ok(SendRequest::new(Target::friend(b.user_id), b.msg))
    });
    reply(&state, request).await
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> MahiroResult<T> {
    serde_json::from_slice(body).map_err(|e| MahiroError::Decode(format!("send request: {e}")))
}

fn check_bot(state: &AppState, qq: Option<i64>) -> MahiroResult<()> {
    match qq {
        Some(qq) if qq != state.bot_id => Err(MahiroError::Decode(format!(
            "request addressed to bot {qq}, this relay is {}",
            state.bot_id
        ))),
        _ => Ok(()),
    }
}

async fn reply(
    state: &AppState,
    request: MahiroResult<SendRequest>,
) -> (StatusCode, Json<CodeReply>) {
    let outcome = match request {
        Ok(request) => {
            let target = request.target;
            info!(target_id = %target, "send request received");
            state.pipeline.send(request).await.map(|_| ())
        }
        Err(e) => Err(e),
    };
    match outcome {
        Ok(()) => (StatusCode::OK, Json(CodeReply { code: 200 })),
        Err(e) => {
            error!(kind = e.kind(), error = %e, "send request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(CodeReply { code: 500 }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mahiro_client::control::ControlFuture;
    use mahiro_client::ControlPlane;
    use mahiro_core::{SendApiPayload, SendResponse};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingControl {
        down: AtomicBool,
        calls: Mutex<Vec<SendApiPayload>>,
    }

    impl ControlPlane for RecordingControl {
        fn is_open(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }

        fn call<'a>(&'a self, payload: &'a SendApiPayload) -> ControlFuture<'a> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(payload.clone());
                Ok(SendResponse::default())
            })
        }
    }

    fn app() -> (Router, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::default());
        let pipeline = Arc::new(OutboundPipeline::new(123, control.clone(), 10));
        (
            router(AppState {
                bot_id: 123,
                pipeline,
            }),
            control,
        )
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, CodeReply) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn group_send_goes_through_pipeline() {
        let (app, control) = app();
        let (status, reply) = post_json(
            app,
            GROUP_ENDPOINT,
            r#"{"groupId":555,"msg":{"Content":"hello","AtUinLists":[{"Uin":777}]},"qq":123}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, CodeReply { code: 200 });
        let calls = control.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cgi_request.to_uin, 555);
        assert_eq!(calls[0].cgi_request.to_type, 2);
        assert_eq!(calls[0].text(), Some("hello"));
        assert_eq!(calls[0].cgi_request.content.mentions.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn friend_send_without_qq() {
        let (app, control) = app();
        let (status, reply) =
            post_json(app, FRIEND_ENDPOINT, r#"{"userId":8,"msg":{"Content":"hey"}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.code, 200);
        assert_eq!(control.calls.lock().unwrap()[0].cgi_request.to_type, 1);
    }

    #[tokio::test]
    async fn malformed_body_is_500() {
        let (app, control) = app();
        let (status, reply) = post_json(app, GROUP_ENDPOINT, r#"{"msg":{"Content":"x"}}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.code, 500);
        assert!(control.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_bot_is_500() {
        let (app, control) = app();
        let (status, _) = post_json(
            app,
            FRIEND_ENDPOINT,
            r#"{"userId":8,"msg":{"Content":"x"},"qq":999}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(control.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnected_gateway_is_500() {
        let (app, control) = app();
        control.down.store(true, Ordering::SeqCst);
        let (status, reply) =
            post_json(app, GROUP_ENDPOINT, r#"{"groupId":1,"msg":{"Content":"x"}}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.code, 500);
    }
}
