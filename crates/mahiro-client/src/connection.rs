//! Gateway connection manager.
//!
//! Owns the single event socket and drives its lifecycle:
//! `Idle → Connecting → Open → Closed → Connecting → …`.
//!
//! Socket errors are only logged; the end of the read loop (close) is what
//! schedules a reconnect. The `retrying` flag keeps at most one reconnect
//! timer pending, since an error and a close can both fire for the same
//! failure.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mahiro_core::{MahiroError, MahiroResult, SendApiPayload};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::control::{ControlFuture, ControlPlane, HttpControl};

/// Default delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

struct ConnectionState {
    status: ConnectionStatus,
    /// A reconnect timer is pending.
    retrying: bool,
    /// Set by `shutdown`; no further connects or reconnects.
    stopped: bool,
    sink: Option<Arc<AsyncMutex<WsSink>>>,
    socket_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnects_scheduled: u64,
}

/// Manages the gateway event socket and exposes the control plane.
pub struct ConnectionManager {
    url: String,
    reconnect_delay: Duration,
    control: HttpControl,
    /// Decoded-order delivery of text frames to the router.
    frames_tx: mpsc::Sender<String>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        control: HttpControl,
        frames_tx: mpsc::Sender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            reconnect_delay,
            control,
            frames_tx,
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Idle,
                retrying: false,
                stopped: false,
                sink: None,
                socket_task: None,
                reconnect_timer: None,
                reconnects_scheduled: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Whether a reconnect timer is pending.
    pub fn is_retrying(&self) -> bool {
        self.state().retrying
    }

    /// Total reconnect timers scheduled since construction.
    pub fn reconnects_scheduled(&self) -> u64 {
        self.state().reconnects_scheduled
    }

    /// Open the socket unless it is already open or connecting.
    ///
    /// Clears the `retrying` flag first; a pending reconnect timer started
    /// elsewhere is cancelled so two attempts never overlap.
    pub fn connect(self: &Arc<Self>) {
        {
            let mut st = self.state();
            st.retrying = false;
            if let Some(timer) = st.reconnect_timer.take() {
                timer.abort();
            }
            if st.stopped {
                debug!("connect ignored: connection manager stopped");
                return;
            }
            if matches!(
                st.status,
                ConnectionStatus::Connecting | ConnectionStatus::Open
            ) {
                debug!(status = %st.status, "connect ignored: socket already active");
                return;
            }
            st.status = ConnectionStatus::Connecting;
        }

        let task = tokio::spawn(Arc::clone(self).run_socket());
        self.state().socket_task = Some(task);
    }

    async fn run_socket(self: Arc<Self>) {
        info!(url = %self.url, "connecting to gateway");
        let ws = match connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                error!(url = %self.url, error = %e, "gateway connect failed");
                self.handle_close();
                return;
            }
        };

        let (sink, stream) = ws.split();
        let sink = Arc::new(AsyncMutex::new(sink));

        let stopped = {
            let mut st = self.state();
            if !st.stopped {
                st.status = ConnectionStatus::Open;
                st.sink = Some(Arc::clone(&sink));
            }
            st.stopped
        };
        if stopped {
            let _ = sink.lock().await.close().await;
            return;
        }
        info!(url = %self.url, "gateway connected");

        self.read_loop(stream, &sink).await;
        self.handle_close();
    }

    async fn read_loop(&self, mut stream: SplitStream<WsStream>, sink: &AsyncMutex<WsSink>) {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Ping(payload)) => {
                    let _ = sink.lock().await.send(Message::Pong(payload)).await;
                    continue;
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "gateway close frame received");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "gateway socket error");
                    break;
                }
            };

            debug!(frame = %text, "gateway frame");
            if self.frames_tx.send(text).await.is_err() {
                debug!("frame consumer dropped, stopping reader");
                break;
            }
        }
    }

    /// Socket closed: mark `Closed` and schedule one reconnect.
    pub(crate) fn handle_close(self: &Arc<Self>) {
        let mut st = self.state();
        st.status = ConnectionStatus::Closed;
        st.sink = None;
        if st.stopped {
            return;
        }
        if st.retrying {
            debug!("reconnect already pending");
            return;
        }

        st.retrying = true;
        st.reconnects_scheduled += 1;
        let delay = self.reconnect_delay;
        warn!(delay_ms = delay.as_millis() as u64, "gateway closed, retrying connect");

        let this = Arc::clone(self);
        st.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.state().reconnect_timer = None;
            this.connect();
        }));
    }

    /// Write one text frame to the socket.
    pub async fn send(&self, text: impl Into<String>) -> MahiroResult<()> {
        let sink = {
            let st = self.state();
            match (&st.status, &st.sink) {
                (ConnectionStatus::Open, Some(sink)) => Arc::clone(sink),
                _ => return Err(MahiroError::NotConnected),
            }
        };
        let result = sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| MahiroError::Transport(format!("socket send: {e}")));
        result
    }

    /// Stop for good: cancel any pending reconnect and close the socket.
    pub async fn shutdown(&self) {
        let (timer, task, sink) = {
            let mut st = self.state();
            st.stopped = true;
            st.retrying = false;
            st.status = ConnectionStatus::Closed;
            (
                st.reconnect_timer.take(),
                st.socket_task.take(),
                st.sink.take(),
            )
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(sink) = sink {
            let _ = sink.lock().await.close().await;
        }
        if let Some(task) = task {
            task.abort();
        }
        info!(url = %self.url, "gateway connection shut down");
    }
}

impl ControlPlane for ConnectionManager {
    fn is_open(&self) -> bool {
        ConnectionManager::is_open(self)
    }

    fn call<'a>(&'a self, payload: &'a SendApiPayload) -> ControlFuture<'a> {
        Box::pin(async move {
            if !ConnectionManager::is_open(self) {
                return Err(MahiroError::NotConnected);
            }
            self.control.send(payload).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    const FRAME: &str = r#"{"CurrentQQ":1,"CurrentPacket":{"EventName":"ON_EVENT_QQNT_NEW_MSG"}}"#;

    fn control() -> HttpControl {
        HttpControl::new("http://127.0.0.1:1", 1, Duration::from_secs(1)).unwrap()
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn send_while_disconnected_is_not_connected() {
        let (tx, _rx) = mpsc::channel(4);
        let manager =
            ConnectionManager::new("ws://127.0.0.1:1/ws", DEFAULT_RECONNECT_DELAY, control(), tx);
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(matches!(manager.send("x").await, Err(MahiroError::NotConnected)));

        let payload = SendApiPayload::for_request(&mahiro_core::SendRequest::new(
            mahiro_core::Target::friend(1),
            mahiro_core::MessagePayload::text("x"),
        ));
        assert!(matches!(
            ControlPlane::call(manager.as_ref(), &payload).await,
            Err(MahiroError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn double_close_schedules_one_reconnect() {
        let (tx, _rx) = mpsc::channel(4);
        let manager =
            ConnectionManager::new("ws://127.0.0.1:1/ws", Duration::from_secs(60), control(), tx);

        manager.handle_close();
        manager.handle_close();

        assert_eq!(manager.status(), ConnectionStatus::Closed);
        assert!(manager.is_retrying());
        assert_eq!(manager.reconnects_scheduled(), 1);

        manager.shutdown().await;
        assert!(!manager.is_retrying());
        manager.handle_close();
        assert_eq!(manager.reconnects_scheduled(), 1);
    }

    #[tokio::test]
    async fn connect_is_noop_while_active() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    sockets.push(ws);
                }
            }
        });

        let (tx, _rx) = mpsc::channel(4);
        let manager = ConnectionManager::new(
            format!("ws://{addr}/ws"),
            Duration::from_secs(60),
            control(),
            tx,
        );
        manager.connect();
        manager.connect();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        wait_until(|| manager.is_open()).await;
        manager.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn delivers_frames_and_reconnects_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (reconnected_tx, reconnected_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(FRAME.to_string())).await.unwrap();
            ws.send(Message::Text("not json".to_string())).await.unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = reconnected_tx.send(());
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::channel(4);
        let manager = ConnectionManager::new(
            format!("ws://{addr}/ws"),
            Duration::from_millis(50),
            control(),
            tx,
        );
        manager.connect();

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, FRAME);
        assert_eq!(second, "not json");

        timeout(Duration::from_secs(5), reconnected_rx)
            .await
            .expect("no reconnect")
            .unwrap();
        wait_until(|| manager.is_open()).await;
        assert_eq!(manager.reconnects_scheduled(), 1);
        assert!(!manager.is_retrying());

        manager.send("ping").await.unwrap();
        manager.shutdown().await;
        assert!(matches!(manager.send("x").await, Err(MahiroError::NotConnected)));
    }

    #[tokio::test]
    async fn answers_ping_and_delivers_utf8_binary_as_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (pong_tx, pong_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Pong(payload) = message {
                    let _ = pong_tx.send(payload);
                    break;
                }
            }
            ws.send(Message::Binary(FRAME.as_bytes().to_vec())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::channel(4);
        let manager = ConnectionManager::new(
            format!("ws://{addr}/ws"),
            Duration::from_secs(60),
            control(),
            tx,
        );
        manager.connect();

        let pong = timeout(Duration::from_secs(5), pong_rx)
            .await
            .expect("ping never answered")
            .unwrap();
        assert_eq!(pong, b"hb");

        let frame = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, FRAME);

        manager.shutdown().await;
    }
}
