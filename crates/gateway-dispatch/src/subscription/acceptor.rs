//! Acceptor resolution: subscription → acceptor of its owning API.

use crate::domain::subscription::Subscription;
use crate::ports::outbound::{Acceptor, AcceptorRegistry};
use std::sync::Arc;

/// Linear scan over the registered subscription acceptors
pub struct SubscriptionAcceptorResolver {
    registry: Arc<dyn AcceptorRegistry>,
}

impl SubscriptionAcceptorResolver {
    pub fn new(registry: Arc<dyn AcceptorRegistry>) -> Self {
        Self { registry }
    }

    /// First acceptor accepting the subscription, `None` when nothing matches
    pub fn resolve(&self, subscription: &Subscription) -> Option<Arc<dyn Acceptor>> {
        self.registry
            .subscription_acceptors()
            .into_iter()
            .find(|acceptor| acceptor.accept(subscription))
    }
}
