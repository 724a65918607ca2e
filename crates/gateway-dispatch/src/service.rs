//! Subscription dispatch service - lifecycle wrapper around the dispatcher.
//!
//! Consumes subscription events produced by the external sync process and
//! logs the outcome of every dispatch on behalf of the caller.

use crate::domain::config::ServiceConfig;
use crate::domain::error::{DispatchError, DispatchResult};
use crate::domain::subscription::Subscription;
use crate::subscription::dispatcher::SubscriptionDispatcher;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Dispatch service state
pub struct SubscriptionDispatchService {
    dispatcher: SubscriptionDispatcher,
    config: ServiceConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl SubscriptionDispatchService {
    pub fn new(dispatcher: SubscriptionDispatcher, config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dispatcher,
            config,
            shutdown_tx,
        }
    }

    /// Event channel sized from `service.event_buffer`
    pub fn event_channel(&self) -> (mpsc::Sender<Subscription>, mpsc::Receiver<Subscription>) {
        mpsc::channel(self.config.event_buffer.max(1))
    }

    /// Dispatch every received subscription until [`stop`](Self::stop) is
    /// called or all senders are dropped.
    ///
    /// Returns the number of events consumed.
    pub async fn start(&self, mut events: mpsc::Receiver<Subscription>) -> usize {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return 0;
        }

        info!("Starting subscription dispatch service...");
        let mut consumed = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Received shutdown signal");
                    break;
                }
                event = events.recv() => {
                    let Some(subscription) = event else {
                        info!("Subscription event channel closed");
                        break;
                    };
                    consumed += 1;
                    self.handle_event(subscription).await;
                }
            }
        }

        info!(consumed, "Subscription dispatch service stopped");
        consumed
    }

    async fn handle_event(&self, subscription: Subscription) {
        let subscription_id = subscription.id.clone();
        let completion = self.dispatcher.dispatch(subscription);

        if completion.is_immediate() {
            log_outcome(&subscription_id, completion.await);
        } else {
            tokio::spawn(async move {
                log_outcome(&subscription_id, completion.await);
            });
        }
    }

    /// Signal the event loop to exit and dispose every active execution
    pub fn stop(&self) -> usize {
        self.shutdown_tx.send_replace(true);
        self.dispatcher.do_stop()
    }

    pub fn dispatcher(&self) -> &SubscriptionDispatcher {
        &self.dispatcher
    }

    pub fn active_count(&self) -> usize {
        self.dispatcher.active_count()
    }
}

fn log_outcome(subscription_id: &str, outcome: DispatchResult) {
    match outcome {
        Ok(()) => debug!(subscription_id, "Subscription dispatch completed"),
        Err(e @ DispatchError::NotDispatched { .. }) => {
            warn!(subscription_id, error = %e, "Subscription not dispatched")
        }
        Err(e) => error!(subscription_id, error = %e, "Subscription dispatch failed"),
    }
}
