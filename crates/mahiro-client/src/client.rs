//! High-level client: wires connection, router, registry, pipeline, and
//! forwarding bridge together.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mahiro_core::{
    Envelope, FriendMessageEvent, GatewayAddress, GroupMessageEvent, MahiroError, MahiroResult,
    MessagePayload, SendRequest, SendResponse,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::{ConnectionManager, DEFAULT_RECONNECT_DELAY};
use crate::control::{ControlPlane, HttpControl};
use crate::forward::ForwardingBridge;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::interceptor::{Interceptor, InterceptorSettings};
use crate::pipeline::OutboundPipeline;
use crate::registry::{CancelHandle, ListenerRegistry};
use crate::router::EventRouter;

/// Frames buffered between the socket reader and the router.
const FRAME_BUFFER: usize = 256;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the client needs at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub bot_id: i64,
    pub gateway: GatewayAddress,
    /// Drop inbound messages sent by the bot itself.
    pub ignore_myself: bool,
    pub reconnect_delay: Duration,
    pub send_timeout: Duration,
    /// Entries kept per target for interceptors. 0 disables history.
    pub history_capacity: usize,
    /// Secondary process base URL. `None` disables forwarding.
    pub forward_base_url: Option<String>,
    pub interceptors: InterceptorSettings,
}

impl ClientConfig {
    pub fn new(bot_id: i64, gateway: GatewayAddress) -> Self {
        Self {
            bot_id,
            gateway,
            ignore_myself: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            forward_base_url: None,
            interceptors: InterceptorSettings::default(),
        }
    }

    pub fn validate(&self) -> MahiroResult<()> {
        if self.bot_id <= 0 {
            return Err(MahiroError::ConfigInvalid(format!(
                "bot qq must be a positive number, got {}",
                self.bot_id
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(MahiroError::ConfigInvalid("reconnect delay must be non-zero".into()));
        }
        Ok(())
    }
}

/// A running relay client.
pub struct MahiroClient {
    config: ClientConfig,
    registry: Arc<ListenerRegistry>,
    connection: Arc<ConnectionManager>,
    pipeline: Arc<OutboundPipeline>,
    forwarding: Option<Arc<ForwardingBridge>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl MahiroClient {
    /// Validate `config`, start routing, and begin connecting.
    ///
    /// Must be called from within a tokio runtime. Returns once the first
    /// connect attempt has been started; the socket opens in the background.
    pub fn start(config: ClientConfig) -> MahiroResult<Self> {
        config.validate()?;
        let interceptors = config.interceptors.build()?;
        let control = HttpControl::new(
            config.gateway.control_base_url(),
            config.bot_id,
            config.send_timeout,
        )?;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let connection = ConnectionManager::new(
            config.gateway.socket_url(),
            config.reconnect_delay,
            control,
            frames_tx,
        );

        let registry = Arc::new(ListenerRegistry::new());
        let forwarding = match &config.forward_base_url {
            Some(url) => {
                let bridge = Arc::new(ForwardingBridge::new(url.as_str())?);
                bridge.register(&registry);
                info!(base_url = %bridge.base_url(), "forwarding inbound events");
                Some(bridge)
            }
            None => None,
        };

        let router = Arc::new(EventRouter::new(
            config.bot_id,
            config.ignore_myself,
            Arc::clone(&registry),
        ));
        let router_task = tokio::spawn(router.run(frames_rx));

        let control_plane: Arc<dyn ControlPlane> = connection.clone();
        let pipeline = Arc::new(
            OutboundPipeline::new(config.bot_id, control_plane, config.history_capacity)
                .with_interceptors(interceptors),
        );

        info!(
            qq = config.bot_id,
            gateway = %config.gateway.socket_url(),
            ignore_myself = config.ignore_myself,
            "mahiro client starting"
        );
        connection.connect();

        Ok(Self {
            config,
            registry,
            connection,
            pipeline,
            forwarding,
            router_task: Mutex::new(Some(router_task)),
        })
    }

    pub fn bot_id(&self) -> i64 {
        self.config.bot_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn on_group_message<F, Fut>(&self, name: &str, handler: F) -> CancelHandle
    where
        F: Fn(GroupMessageEvent, Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on_group(name, handler)
    }

    pub fn on_friend_message<F, Fut>(&self, name: &str, handler: F) -> CancelHandle
    where
        F: Fn(FriendMessageEvent, Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on_friend(name, handler)
    }

    pub async fn send(&self, request: SendRequest) -> MahiroResult<SendResponse> {
        self.pipeline.send(request).await
    }

    pub async fn send_group_message(
        &self,
        group_id: i64,
        content: MessagePayload,
    ) -> MahiroResult<SendResponse> {
        self.pipeline.send_group_message(group_id, content).await
    }

    pub async fn send_friend_message(
        &self,
        user_id: i64,
        content: MessagePayload,
    ) -> MahiroResult<SendResponse> {
        self.pipeline.send_friend_message(user_id, content).await
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.pipeline.add_interceptor(interceptor);
    }

    pub fn remove_interceptor(&self, name: &str) -> bool {
        self.pipeline.remove_interceptor(name)
    }

    pub fn pipeline(&self) -> &Arc<OutboundPipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn forwarding(&self) -> Option<&Arc<ForwardingBridge>> {
        self.forwarding.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Close the socket, stop reconnecting, and stop the router.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        let task = self
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!(qq = self.config.bot_id, "mahiro client stopped");
    }
}
