//! Outbound interceptors: ordered veto checks run before every send.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mahiro_core::{MahiroError, MahiroResult, SendApiPayload, Target};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::HistoryEntry;

pub const CONTENT_SAFETY: &str = "content-safety";
pub const REPEAT_GUARD: &str = "repeat-guard";

/// Boxed future returned by [`Interceptor::check`].
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// What an interceptor gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct InterceptorContext<'a> {
    pub bot_id: i64,
    pub target: Target,
    /// Exact payload about to go to the control plane.
    pub request: &'a SendApiPayload,
    /// Earlier sends to the same target, oldest first.
    pub history: &'a [HistoryEntry],
}

/// A named check that may veto an outbound message.
///
/// Returning `false` stops the send; later interceptors are not consulted.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    fn check<'a>(&'a self, ctx: &'a InterceptorContext<'a>) -> CheckFuture<'a>;
}

/// Interceptor backed by a synchronous closure.
pub struct FnInterceptor<F> {
    name: String,
    check: F,
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&InterceptorContext<'_>) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check<'a>(&'a self, ctx: &'a InterceptorContext<'a>) -> CheckFuture<'a> {
        let allowed = (self.check)(ctx);
        Box::pin(std::future::ready(allowed))
    }
}

/// Wrap a closure as an interceptor.
pub fn interceptor_fn<F>(name: impl Into<String>, check: F) -> Arc<dyn Interceptor>
where
    F: Fn(&InterceptorContext<'_>) -> bool + Send + Sync + 'static,
{
    Arc::new(FnInterceptor {
        name: name.into(),
        check,
    })
}

/// Rejects empty messages and text containing a blocked term.
#[derive(Debug, Clone, Default)]
pub struct ContentSafety {
    blocked_terms: Vec<String>,
}

impl ContentSafety {
    pub fn new<I, S>(blocked_terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked_terms: blocked_terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    fn allows(&self, ctx: &InterceptorContext<'_>) -> bool {
        let content = &ctx.request.cgi_request.content;
        if content.is_empty() {
            warn!(target_id = %ctx.target, "refusing to send an empty message");
            return false;
        }
        let Some(text) = content.text.as_deref() else {
            return true;
        };
        let lowered = text.to_lowercase();
        match self.blocked_terms.iter().find(|t| lowered.contains(t.as_str())) {
            Some(term) => {
                warn!(target_id = %ctx.target, term = %term, "message contains a blocked term");
                false
            }
            None => true,
        }
    }
}

impl Interceptor for ContentSafety {
    fn name(&self) -> &str {
        CONTENT_SAFETY
    }

    fn check<'a>(&'a self, ctx: &'a InterceptorContext<'a>) -> CheckFuture<'a> {
        Box::pin(std::future::ready(self.allows(ctx)))
    }
}

/// Rejects text identical to one of the last `window` texts sent to the
/// same target.
#[derive(Debug, Clone)]
pub struct RepeatGuard {
    window: usize,
}

impl RepeatGuard {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    fn allows(&self, ctx: &InterceptorContext<'_>) -> bool {
        let Some(text) = ctx.request.text().filter(|t| !t.is_empty()) else {
            return true;
        };
        let repeated = ctx
            .history
            .iter()
            .rev()
            .take(self.window)
            .any(|entry| entry.request.text() == Some(text));
        if repeated {
            warn!(target_id = %ctx.target, window = self.window, "suppressing repeated message");
        }
        !repeated
    }
}

impl Interceptor for RepeatGuard {
    fn name(&self) -> &str {
        REPEAT_GUARD
    }

    fn check<'a>(&'a self, ctx: &'a InterceptorContext<'a>) -> CheckFuture<'a> {
        Box::pin(std::future::ready(self.allows(ctx)))
    }
}

/// Built-in interceptor selection, in the order they run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorSettings {
    pub enabled: Vec<String>,
    pub blocked_terms: Vec<String>,
    pub repeat_window: usize,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            enabled: vec![CONTENT_SAFETY.to_string()],
            blocked_terms: Vec::new(),
            repeat_window: 3,
        }
    }
}

impl InterceptorSettings {
    /// Instantiate the enabled built-ins. Unknown names are rejected.
    pub fn build(&self) -> MahiroResult<Vec<Arc<dyn Interceptor>>> {
        self.enabled
            .iter()
            .map(|name| -> MahiroResult<Arc<dyn Interceptor>> {
                match name.as_str() {
                    CONTENT_SAFETY => Ok(Arc::new(ContentSafety::new(&self.blocked_terms))),
                    REPEAT_GUARD => Ok(Arc::new(RepeatGuard::new(self.repeat_window))),
                    other => Err(MahiroError::ConfigInvalid(format!(
                        "unknown interceptor: {other}"
                    ))),
                }
            })
            .collect()
    }
}
