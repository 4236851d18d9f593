//! Listener registry: per-category, ordered handler collections.
//!
//! Names are labels for logs only and need not be unique; removal goes
//! through the [`CancelHandle`] returned at registration. Dispatch iterates
//! over a snapshot, so a handler may cancel itself (or others) mid-dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use mahiro_core::{Category, Envelope, FriendMessageEvent, GroupMessageEvent};
use tracing::{debug, info};

/// Future returned by a listener invocation.
pub type ListenerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased listener for events of type `E`.
pub type Handler<E> = Arc<dyn Fn(E, Arc<Envelope>) -> ListenerFuture + Send + Sync>;

/// Opaque identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registered listener.
pub struct Listener<E> {
    pub id: ListenerId,
    pub name: Arc<str>,
    pub handler: Handler<E>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Ordered listeners of one category.
pub struct ListenerSet<E> {
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> ListenerSet<E> {
    fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn insert(&self, listener: Listener<E>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove the listener with this id. Returns false if it was not present.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() < before
    }

    /// Listeners in registration order, detached from later changes.
    pub fn snapshot(&self) -> Vec<Listener<E>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: ListenerId) -> bool;
}

impl<E: 'static> Unregister for ListenerSet<E> {
    fn unregister(&self, id: ListenerId) -> bool {
        self.remove(id)
    }
}

/// Removes exactly one registration when invoked.
///
/// Dropping the handle does not unregister the listener.
pub struct CancelHandle {
    id: ListenerId,
    category: Category,
    name: Arc<str>,
    set: Weak<dyn Unregister>,
}

impl CancelHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Unregister the listener. Returns false if it was already gone.
    ///
    /// In-flight invocations are not interrupted.
    pub fn cancel(&self) -> bool {
        let Some(set) = self.set.upgrade() else {
            return false;
        };
        let removed = set.unregister(self.id);
        if removed {
            info!(category = %self.category, listener = %self.name, "listener cancelled");
        } else {
            debug!(category = %self.category, listener = %self.name, "listener already removed");
        }
        removed
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("name", &self.name)
            .finish()
    }
}

/// Group and friend listener collections.
pub struct ListenerRegistry {
    next_id: AtomicU64,
    group: Arc<ListenerSet<GroupMessageEvent>>,
    friend: Arc<ListenerSet<FriendMessageEvent>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            group: Arc::new(ListenerSet::new()),
            friend: Arc::new(ListenerSet::new()),
        }
    }

    /// Register an async group listener.
    pub fn on_group<F, Fut>(&self, name: &str, handler: F) -> CancelHandle
    where
        F: Fn(GroupMessageEvent, Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let erased = move |event: GroupMessageEvent, env: Arc<Envelope>| -> ListenerFuture {
            Box::pin(handler(event, env))
        };
        self.register_group(name, Arc::new(erased))
    }

    /// Register an async friend listener.
    pub fn on_friend<F, Fut>(&self, name: &str, handler: F) -> CancelHandle
    where
        F: Fn(FriendMessageEvent, Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let erased = move |event: FriendMessageEvent, env: Arc<Envelope>| -> ListenerFuture {
            Box::pin(handler(event, env))
        };
        self.register_friend(name, Arc::new(erased))
    }

    pub fn register_group(&self, name: &str, handler: Handler<GroupMessageEvent>) -> CancelHandle {
        self.register(&self.group, Category::Group, name, handler)
    }

    pub fn register_friend(
        &self,
        name: &str,
        handler: Handler<FriendMessageEvent>,
    ) -> CancelHandle {
        self.register(&self.friend, Category::Friend, name, handler)
    }

    fn register<E: 'static>(
        &self,
        set: &Arc<ListenerSet<E>>,
        category: Category,
        name: &str,
        handler: Handler<E>,
    ) -> CancelHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(name);
        set.insert(Listener {
            id,
            name: Arc::clone(&name),
            handler,
        });
        info!(category = %category, listener = %name, "listener registered");

        let erased: Arc<dyn Unregister> = Arc::clone(set) as Arc<dyn Unregister>;
        CancelHandle {
            id,
            category,
            name,
            set: Arc::downgrade(&erased),
        }
    }

    pub fn group_listeners(&self) -> Vec<Listener<GroupMessageEvent>> {
        self.group.snapshot()
    }

    pub fn friend_listeners(&self) -> Vec<Listener<FriendMessageEvent>> {
        self.friend.snapshot()
    }

    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::Group => self.group.len(),
            Category::Friend => self.friend.len(),
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_registry() -> ListenerRegistry {
        ListenerRegistry::new()
    }

    #[test]
    fn register_and_cancel() {
        let registry = noop_registry();
        let handle = registry.on_group("a", |_, _| async { Ok(()) });
        assert_eq!(registry.count(Category::Group), 1);
        assert_eq!(registry.count(Category::Friend), 0);

        assert!(handle.cancel());
        assert_eq!(registry.count(Category::Group), 0);
        assert!(!handle.cancel());
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let registry = noop_registry();
        for name in ["first", "second", "third"] {
            registry.on_friend(name, |_, _| async { Ok(()) });
        }
        let names: Vec<_> = registry
            .friend_listeners()
            .iter()
            .map(|l| l.name.to_string())
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn duplicate_names_removed_by_identity() {
        let registry = noop_registry();
        let first = registry.on_group("same", |_, _| async { Ok(()) });
        let _second = registry.on_group("same", |_, _| async { Ok(()) });

        assert!(first.cancel());
        let left = registry.group_listeners();
        assert_eq!(left.len(), 1);
        assert_ne!(left[0].id, first.id());
    }

    #[test]
    fn snapshot_survives_removal() {
        let registry = noop_registry();
        let a = registry.on_group("a", |_, _| async { Ok(()) });
        registry.on_group("b", |_, _| async { Ok(()) });

        let snapshot = registry.group_listeners();
        a.cancel();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.count(Category::Group), 1);
    }

    #[test]
    fn cancel_after_registry_dropped_is_noop() {
        let registry = noop_registry();
        let handle = registry.on_friend("x", |_, _| async { Ok(()) });
        drop(registry);
        assert!(!handle.cancel());
    }
}
