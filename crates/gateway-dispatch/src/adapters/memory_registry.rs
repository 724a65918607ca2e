//! In-memory acceptor registry.

use crate::ports::outbound::{Acceptor, AcceptorRegistry, ApiReactor};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Acceptor binding one API id to its (optional) reactor
pub struct DefaultSubscriptionAcceptor {
    api_id: String,
    reactor: Option<Arc<dyn ApiReactor>>,
}

impl DefaultSubscriptionAcceptor {
    pub fn new(api_id: impl Into<String>, reactor: Option<Arc<dyn ApiReactor>>) -> Self {
        Self {
            api_id: api_id.into(),
            reactor,
        }
    }
}

impl Acceptor for DefaultSubscriptionAcceptor {
    fn api_id(&self) -> &str {
        &self.api_id
    }

    fn reactor(&self) -> Option<Arc<dyn ApiReactor>> {
        self.reactor.clone()
    }
}

/// Acceptors of the APIs deployed on this node, in registration order
#[derive(Default)]
pub struct InMemoryAcceptorRegistry {
    acceptors: RwLock<Vec<Arc<dyn Acceptor>>>,
}

impl InMemoryAcceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an acceptor, replacing any previous one for the same API
    pub fn register(&self, acceptor: Arc<dyn Acceptor>) {
        let mut acceptors = self.acceptors.write();
        acceptors.retain(|existing| existing.api_id() != acceptor.api_id());
        debug!(api = %acceptor.api_id(), "Registered subscription acceptor");
        acceptors.push(acceptor);
    }

    /// Remove the acceptor of an API. Returns true if one was registered.
    pub fn unregister(&self, api_id: &str) -> bool {
        let mut acceptors = self.acceptors.write();
        let before = acceptors.len();
        acceptors.retain(|existing| existing.api_id() != api_id);
        before != acceptors.len()
    }

    pub fn len(&self) -> usize {
        self.acceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.acceptors.read().is_empty()
    }
}

impl AcceptorRegistry for InMemoryAcceptorRegistry {
    fn subscription_acceptors(&self) -> Vec<Arc<dyn Acceptor>> {
        self.acceptors.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::Subscription;

    #[test]
    fn test_register_replaces_same_api() {
        let registry = InMemoryAcceptorRegistry::new();
        registry.register(Arc::new(DefaultSubscriptionAcceptor::new("api-1", None)));
        registry.register(Arc::new(DefaultSubscriptionAcceptor::new("api-1", None)));
        registry.register(Arc::new(DefaultSubscriptionAcceptor::new("api-2", None)));

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = InMemoryAcceptorRegistry::new();
        registry.register(Arc::new(DefaultSubscriptionAcceptor::new("api-1", None)));

        assert!(registry.unregister("api-1"));
        assert!(!registry.unregister("api-1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_acceptor_matches_api() {
        let acceptor = DefaultSubscriptionAcceptor::new("api-1", None);
        assert!(acceptor.accept(&Subscription::new("sub", "api-1")));
        assert!(!acceptor.accept(&Subscription::new("sub", "api-2")));
        assert!(acceptor.reactor().is_none());
    }
}
