//! Event router: decoded envelopes to listener invocations.
//!
//! Frames are routed one at a time in socket order. Listeners for a frame
//! are invoked in registration order; each invocation's future runs as its
//! own task, so a slow or failing listener never blocks the next frame.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use mahiro_core::{
    codec, Category, Envelope, FriendMessageEvent, GroupMessageEvent, EVENT_NEW_MESSAGE,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::registry::{Listener, ListenerRegistry};

/// Why a frame was turned away before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Frame addressed to a different bot identity.
    IdentityMismatch { received: i64 },
    /// Event other than the new-message event.
    UnsupportedEvent(String),
}

/// What happened to one envelope.
#[derive(Debug)]
pub enum RouteOutcome {
    Rejected(Rejection),
    /// Not a group or friend message.
    Ignored,
    /// Recognized category, but required head fields were missing.
    Incomplete,
    /// Sent by the bot itself while `ignore_myself` is on.
    OwnMessage,
    Dispatched(Dispatch),
}

impl RouteOutcome {
    pub fn dispatched(&self) -> Option<&Dispatch> {
        match self {
            RouteOutcome::Dispatched(d) => Some(d),
            _ => None,
        }
    }
}

/// Listener invocations started for one event.
#[derive(Debug)]
pub struct Dispatch {
    pub category: Category,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatch {
    /// Number of listeners invoked.
    pub fn listeners(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every invocation has finished (successfully or not).
    pub async fn settled(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Classifies envelopes and fans them out to the registry.
pub struct EventRouter {
    bot_id: i64,
    ignore_myself: bool,
    registry: Arc<ListenerRegistry>,
}

impl EventRouter {
    pub fn new(bot_id: i64, ignore_myself: bool, registry: Arc<ListenerRegistry>) -> Self {
        Self {
            bot_id,
            ignore_myself,
            registry,
        }
    }

    /// Consume frames until the channel closes.
    pub async fn run(self: Arc<Self>, mut frames: mpsc::Receiver<String>) {
        while let Some(frame) = frames.recv().await {
            self.route_frame(&frame);
        }
        debug!("frame channel closed, router stopped");
    }

    /// Decode and route one raw frame. Malformed frames are logged and
    /// dropped (`None`).
    pub fn route_frame(&self, raw: &str) -> Option<RouteOutcome> {
        match codec::decode_str(raw) {
            Ok(envelope) => Some(self.route(envelope)),
            Err(e) => {
                error!(error = %e, "dropping malformed gateway frame");
                None
            }
        }
    }

    pub fn route(&self, envelope: Envelope) -> RouteOutcome {
        if envelope.source_identity() != self.bot_id {
            error!(
                received = envelope.source_identity(),
                expected = self.bot_id,
                "CurrentQQ does not match bot identity"
            );
            return RouteOutcome::Rejected(Rejection::IdentityMismatch {
                received: envelope.source_identity(),
            });
        }
        if envelope.event_name() != EVENT_NEW_MESSAGE {
            error!(event = %envelope.event_name(), "unsupported event name");
            return RouteOutcome::Rejected(Rejection::UnsupportedEvent(
                envelope.event_name().to_string(),
            ));
        }

        let Some(head) = envelope.head() else {
            return RouteOutcome::Ignored;
        };
        debug!(
            from_type = ?head.from_type,
            msg_type = ?head.msg_type,
            c2c_cmd = ?head.c2c_cmd,
            content = envelope.body().and_then(|b| b.content.as_deref()).unwrap_or(""),
            "message received"
        );
        let Some(category) = Category::classify(head) else {
            return RouteOutcome::Ignored;
        };

        match category {
            Category::Group => {
                let event = match GroupMessageEvent::from_parts(head, envelope.body()) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(error = %e, "incomplete group message");
                        return RouteOutcome::Incomplete;
                    }
                };
                if self.is_own(event.sender_id) {
                    return RouteOutcome::OwnMessage;
                }
                info!(
                    group_id = event.group_id,
                    group_name = %event.group_name,
                    sender_id = event.sender_id,
                    sender_name = %event.sender_name,
                    "group message"
                );
                let listeners = self.registry.group_listeners();
                RouteOutcome::Dispatched(dispatch(category, listeners, event, Arc::new(envelope)))
            }
            Category::Friend => {
                let event = match FriendMessageEvent::from_parts(head, envelope.body()) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(error = %e, "incomplete friend message");
                        return RouteOutcome::Incomplete;
                    }
                };
                if self.is_own(event.sender_id) {
                    return RouteOutcome::OwnMessage;
                }
                info!(
                    sender_id = event.sender_id,
                    sender_name = %event.sender_name,
                    "friend message"
                );
                let listeners = self.registry.friend_listeners();
                RouteOutcome::Dispatched(dispatch(category, listeners, event, Arc::new(envelope)))
            }
        }
    }

    fn is_own(&self, sender_id: i64) -> bool {
        self.ignore_myself && sender_id == self.bot_id
    }
}

/// Invoke each listener in order, isolating panics and errors per listener.
fn dispatch<E: Clone>(
    category: Category,
    listeners: Vec<Listener<E>>,
    event: E,
    envelope: Arc<Envelope>,
) -> Dispatch {
    let mut tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let name = Arc::clone(&listener.name);
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            (listener.handler)(event.clone(), Arc::clone(&envelope))
        }));
        let future = match started {
            Ok(future) => future,
            Err(_) => {
                error!(category = %category, listener = %name, "listener panicked");
                continue;
            }
        };

        tasks.push(tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(category = %category, listener = %name, error = %e, "listener failed")
                }
                Err(_) => error!(category = %category, listener = %name, "listener panicked"),
            }
        }));
    }
    Dispatch { category, tasks }
}
