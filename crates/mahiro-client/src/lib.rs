//! mahiro-client: relay runtime for a QQ bot gateway.
//!
//! Keeps one event socket open (reconnecting on loss), routes decoded
//! frames to group and friend listeners, and sends replies through an
//! interceptor chain to the gateway's HTTP control endpoint. Every inbound
//! event can also be relayed to a secondary process.

pub mod client;
pub mod connection;
pub mod control;
pub mod forward;
pub mod history;
pub mod interceptor;
pub mod pipeline;
pub mod registry;
pub mod router;

pub use client::{ClientConfig, MahiroClient};
pub use connection::{ConnectionManager, ConnectionStatus};
pub use control::{ControlPlane, HttpControl};
pub use forward::{ForwardOutcome, ForwardingBridge};
pub use history::{HistoryEntry, MessageHistory};
pub use interceptor::{interceptor_fn, Interceptor, InterceptorContext, InterceptorSettings};
pub use pipeline::OutboundPipeline;
pub use registry::{CancelHandle, ListenerRegistry};
pub use router::{EventRouter, RouteOutcome};
