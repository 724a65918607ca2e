//! Active dispatch registry.
//!
//! Two maps co-indexed by subscription id: the last dispatched subscription
//! and the handle of its running execution. Every mutation for an id runs
//! under the `active_disposables` entry lock for that id, then touches
//! `active_subscriptions`; that order is the same everywhere.

use crate::domain::subscription::{Subscription, SubscriptionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancellation handle of one running execution.
///
/// Cloning shares the handle; disposing is idempotent.
#[derive(Clone)]
pub struct DispatchHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    generation: u64,
    token: CancellationToken,
}

impl DispatchHandle {
    fn new(generation: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                generation,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Monotonic number of the execution this handle belongs to
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Cancel the execution (pending timers, in-flight attempt, held connections)
    pub fn dispose(&self) {
        self.inner.token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Same execution (reference identity)
    pub fn ptr_eq(&self, other: &DispatchHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("generation", &self.inner.generation)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Outcome of preparing the registry for a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// Nothing was tracked for this id
    Fresh,
    /// Same configuration already running; keep it
    Unchanged,
    /// A previous execution was disposed and removed
    Replaced,
}

/// Registry of running executions, one per subscription id
#[derive(Default)]
pub struct ActiveDispatchRegistry {
    active_subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    active_disposables: DashMap<SubscriptionId, DispatchHandle>,
    next_generation: AtomicU64,
}

impl ActiveDispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an unchanged running execution, otherwise dispose and remove it.
    pub(crate) fn prepare(&self, subscription: &Subscription) -> Preparation {
        match self.active_disposables.entry(subscription.id.clone()) {
            Entry::Occupied(entry) => {
                let unchanged = !subscription.force_dispatch
                    && !entry.get().is_disposed()
                    && self
                        .active_subscriptions
                        .get(&subscription.id)
                        .is_some_and(|active| active.same_configuration(subscription));
                if unchanged {
                    return Preparation::Unchanged;
                }
                let handle = entry.remove();
                self.active_subscriptions.remove(&subscription.id);
                handle.dispose();
                Preparation::Replaced
            }
            Entry::Vacant(_) => {
                self.active_subscriptions.remove(&subscription.id);
                Preparation::Fresh
            }
        }
    }

    /// Track a new execution for the subscription.
    ///
    /// A concurrent registration for the same id that won the race is
    /// disposed so only the latest execution stays live.
    pub(crate) fn register(&self, subscription: Arc<Subscription>) -> DispatchHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = DispatchHandle::new(generation);
        let id = subscription.id.clone();

        match self.active_disposables.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(handle.clone());
                self.active_subscriptions.insert(id, subscription);
                previous.dispose();
            }
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
                self.active_subscriptions.insert(id, subscription);
            }
        }

        handle
    }

    /// Dispose and remove whatever runs for `id`. Returns true if something was tracked.
    pub(crate) fn evict(&self, id: &str) -> bool {
        match self.active_disposables.entry(id.to_owned()) {
            Entry::Occupied(entry) => {
                let handle = entry.remove();
                self.active_subscriptions.remove(id);
                handle.dispose();
                true
            }
            Entry::Vacant(_) => {
                self.active_subscriptions.remove(id);
                false
            }
        }
    }

    /// Terminal outcome of the execution owning `handle`.
    ///
    /// Removes the entry only if it still belongs to that execution, so a
    /// replaced execution never removes its successor.
    pub(crate) fn complete(&self, id: &str, handle: &DispatchHandle) -> bool {
        let removed = match self.active_disposables.entry(id.to_owned()) {
            Entry::Occupied(entry) if entry.get().ptr_eq(handle) => {
                entry.remove();
                self.active_subscriptions.remove(id);
                true
            }
            _ => false,
        };
        handle.dispose();
        removed
    }

    /// Dispose every tracked execution and clear both maps
    pub(crate) fn clear(&self) -> usize {
        let ids: Vec<SubscriptionId> = self
            .active_disposables
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter(|id| self.evict(id)).count()
    }

    pub fn active_subscription(&self, id: &str) -> Option<Arc<Subscription>> {
        self.active_subscriptions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn active_disposable(&self, id: &str) -> Option<DispatchHandle> {
        self.active_disposables
            .get(id)
            .map(|entry| entry.value().clone())
    }

    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        self.active_disposables
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active_disposables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_disposables.is_empty()
    }

    /// Number of tracked subscriptions (equal to `len()` outside transitions)
    pub fn subscriptions_len(&self) -> usize {
        self.active_subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(id: &str, url: &str) -> Subscription {
        Subscription::new(id, "api-1").with_configuration(format!(
            r#"{{"entrypointId": "webhook", "entrypointConfiguration": {{"callbackUrl": "{url}"}}}}"#
        ))
    }

    #[test]
    fn test_register_tracks_both_maps() {
        let registry = ActiveDispatchRegistry::new();
        let handle = registry.register(Arc::new(webhook("sub-1", "http://a")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.subscriptions_len(), 1);
        assert!(registry.active_disposable("sub-1").unwrap().ptr_eq(&handle));
        assert!(!handle.is_disposed());
    }

    #[test]
    fn test_prepare_unchanged_keeps_handle() {
        let registry = ActiveDispatchRegistry::new();
        let handle = registry.register(Arc::new(webhook("sub-1", "http://a")));

        let outcome = registry.prepare(&webhook("sub-1", "http://a"));

        assert_eq!(outcome, Preparation::Unchanged);
        assert!(!handle.is_disposed());
        assert!(registry.active_disposable("sub-1").unwrap().ptr_eq(&handle));
    }

    #[test]
    fn test_prepare_changed_configuration_disposes() {
        let registry = ActiveDispatchRegistry::new();
        let handle = registry.register(Arc::new(webhook("sub-1", "http://a")));

        let outcome = registry.prepare(&webhook("sub-1", "http://b"));

        assert_eq!(outcome, Preparation::Replaced);
        assert!(handle.is_disposed());
        assert!(registry.is_empty());
        assert_eq!(registry.subscriptions_len(), 0);
    }

    #[test]
    fn test_prepare_force_dispatch_disposes() {
        let registry = ActiveDispatchRegistry::new();
        let handle = registry.register(Arc::new(webhook("sub-1", "http://a")));

        let outcome = registry.prepare(&webhook("sub-1", "http://a").with_force_dispatch(true));

        assert_eq!(outcome, Preparation::Replaced);
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_complete_ignores_stale_handle() {
        let registry = ActiveDispatchRegistry::new();
        let first = registry.register(Arc::new(webhook("sub-1", "http://a")));
        let second = registry.register(Arc::new(webhook("sub-1", "http://b")));

        assert!(first.is_disposed());
        assert!(!registry.complete("sub-1", &first));
        assert!(registry.active_disposable("sub-1").unwrap().ptr_eq(&second));

        assert!(registry.complete("sub-1", &second));
        assert!(second.is_disposed());
        assert!(registry.is_empty());
        assert_eq!(registry.subscriptions_len(), 0);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let registry = ActiveDispatchRegistry::new();
        let handle = registry.register(Arc::new(webhook("sub-1", "http://a")));

        assert!(registry.evict("sub-1"));
        assert!(!registry.evict("sub-1"));
        assert!(handle.is_disposed());
        handle.dispose();
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_clear_disposes_everything() {
        let registry = ActiveDispatchRegistry::new();
        let handles: Vec<_> = (0..3)
            .map(|i| registry.register(Arc::new(webhook(&format!("sub-{i}"), "http://a"))))
            .collect();

        assert_eq!(registry.clear(), 3);
        assert!(handles.iter().all(DispatchHandle::is_disposed));
        assert!(registry.is_empty());
        assert_eq!(registry.subscriptions_len(), 0);
    }

    #[test]
    fn test_generations_increase() {
        let registry = ActiveDispatchRegistry::new();
        let a = registry.register(Arc::new(webhook("sub-1", "http://a")));
        let b = registry.register(Arc::new(webhook("sub-2", "http://a")));
        assert!(b.generation() > a.generation());
    }
}
