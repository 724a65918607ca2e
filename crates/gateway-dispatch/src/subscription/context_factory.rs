//! Execution context creation for one dispatch attempt.

use crate::domain::context::{attributes, ExecutionContext};
use crate::domain::error::{DispatchError, DispatchResult};
use crate::domain::subscription::{Subscription, SubscriptionConfiguration};
use std::sync::Arc;
use tracing::debug;

/// Builds isolated contexts for subscription dispatch attempts
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionExecutionContextFactory;

impl SubscriptionExecutionContextFactory {
    pub fn new() -> Self {
        Self
    }

    /// Extract the entrypoint id (subscription type) from the configuration.
    ///
    /// Missing, empty or unparsable configurations and configurations
    /// without an `entrypointId` are routing errors, never retried.
    pub fn validate(&self, subscription: &Subscription) -> DispatchResult<String> {
        let raw = subscription
            .configuration
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| {
                DispatchError::not_dispatched(&subscription.id, "missing subscription configuration")
            })?;

        let configuration = SubscriptionConfiguration::parse(raw).map_err(|e| {
            DispatchError::not_dispatched(
                &subscription.id,
                format!("invalid subscription configuration: {e}"),
            )
        })?;

        configuration
            .entrypoint()
            .map(str::to_owned)
            .ok_or_else(|| {
                DispatchError::not_dispatched(
                    &subscription.id,
                    "subscription configuration has no entrypoint id",
                )
            })
    }

    /// Fresh context with its own request id, carrying the subscription
    pub fn create(&self, subscription: &Arc<Subscription>) -> DispatchResult<ExecutionContext> {
        let subscription_type = self.validate(subscription)?;
        let context = ExecutionContext::new();

        context.set_subscription(Arc::clone(subscription));
        context.set_subscription_type(subscription_type.as_str());

        context.set_attribute(attributes::API, subscription.api.as_str());
        context.set_attribute(attributes::SUBSCRIPTION, subscription.id.as_str());
        if let Some(plan) = &subscription.plan {
            context.set_attribute(attributes::PLAN, plan.as_str());
        }
        if let Some(application) = &subscription.application {
            context.set_attribute(attributes::APPLICATION, application.as_str());
        }

        context.request().with_metrics(|metrics| {
            metrics.api = Some(subscription.api.clone());
            metrics.plan = subscription.plan.clone();
            metrics.application = subscription.application.clone();
            metrics.subscription = Some(subscription.id.clone());
        });

        debug!(
            subscription_id = %subscription.id,
            request_id = %context.request().id(),
            subscription_type = %subscription_type,
            "Created subscription execution context"
        );

        Ok(context)
    }
}
