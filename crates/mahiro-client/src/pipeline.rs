//! Outbound send path: connection check, interceptor chain, history, send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use mahiro_core::{
    MahiroError, MahiroResult, MessagePayload, SendApiPayload, SendRequest, SendResponse, Target,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::control::ControlPlane;
use crate::history::{HistoryEntry, MessageHistory};
use crate::interceptor::{Interceptor, InterceptorContext};

/// Characters of message text included in the send log line.
const PREVIEW_CHARS: usize = 10;

pub struct OutboundPipeline {
    bot_id: i64,
    control: Arc<dyn ControlPlane>,
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
    history: Mutex<MessageHistory>,
    /// Held from the history snapshot through the history append, so sends
    /// to one target are checked against each other in order.
    target_locks: Mutex<HashMap<Target, Arc<AsyncMutex<()>>>>,
}

impl OutboundPipeline {
    pub fn new(bot_id: i64, control: Arc<dyn ControlPlane>, history_capacity: usize) -> Self {
        Self {
            bot_id,
            control,
            interceptors: RwLock::new(Vec::new()),
            history: Mutex::new(MessageHistory::new(history_capacity)),
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_interceptors(self, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        *self.interceptors.write().unwrap_or_else(PoisonError::into_inner) = interceptors;
        self
    }

    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }

    /// Append an interceptor to the end of the chain.
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        info!(interceptor = %interceptor.name(), "interceptor added");
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interceptor);
    }

    /// Remove every interceptor with this name. Returns false if none matched.
    pub fn remove_interceptor(&self, name: &str) -> bool {
        let mut chain = self.interceptors.write().unwrap_or_else(PoisonError::into_inner);
        let before = chain.len();
        chain.retain(|i| i.name() != name);
        let removed = chain.len() < before;
        if removed {
            info!(interceptor = %name, "interceptor removed");
        }
        removed
    }

    pub fn interceptor_names(&self) -> Vec<String> {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Earlier sends to `target`, oldest first.
    pub fn history_for(&self, target: &Target) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(target)
    }

    fn target_lock(&self, target: Target) -> Arc<AsyncMutex<()>> {
        let mut locks = self.target_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(target).or_default())
    }

    pub async fn send_group_message(
        &self,
        group_id: i64,
        content: MessagePayload,
    ) -> MahiroResult<SendResponse> {
        self.send(SendRequest::new(Target::group(group_id), content)).await
    }

    pub async fn send_friend_message(
        &self,
        user_id: i64,
        content: MessagePayload,
    ) -> MahiroResult<SendResponse> {
        self.send(SendRequest::new(Target::friend(user_id), content)).await
    }

    /// Send one message.
    ///
    /// Nothing runs while the gateway is down. The first interceptor that
    /// returns false ends the send with `Vetoed`; history is only appended
    /// for requests that reach the control plane. Concurrent sends to the
    /// same target pass through the interceptors one at a time.
    pub async fn send(&self, request: SendRequest) -> MahiroResult<SendResponse> {
        let target = request.target;
        if !self.control.is_open() {
            warn!(target_id = %target, "send attempted while gateway is disconnected");
            return Err(MahiroError::NotConnected);
        }

        let payload = SendApiPayload::for_request(&request);
        let target_lock = self.target_lock(target);
        let serialized = target_lock.lock().await;
        let history = self.history_for(&target);
        let chain: Vec<Arc<dyn Interceptor>> = self
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let ctx = InterceptorContext {
            bot_id: self.bot_id,
            target,
            request: &payload,
            history: &history,
        };
        for interceptor in &chain {
            if !interceptor.check(&ctx).await {
                info!(target_id = %target, interceptor = %interceptor.name(), "send vetoed");
                return Err(MahiroError::Vetoed {
                    interceptor: interceptor.name().to_string(),
                });
            }
            debug!(target_id = %target, interceptor = %interceptor.name(), "interceptor passed");
        }

        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target, HistoryEntry::now(payload.clone()));
        drop(serialized);

        info!(
            target_id = %target,
            preview = %request.content.preview(PREVIEW_CHARS),
            "sending message"
        );
        self.control.call(&payload).await
    }
}
