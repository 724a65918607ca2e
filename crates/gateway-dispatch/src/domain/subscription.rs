//! Subscription model handed to the dispatcher by the sync process.
//!
//! The dispatcher owns the *execution* of a subscription, never its
//! persistence: instances are created and updated elsewhere and pushed in
//! through [`crate::SubscriptionDispatcher::dispatch`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Subscription identifier (stable key of the active dispatch registry)
pub type SubscriptionId = String;

/// Lifecycle status of a subscription as decided by the management plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Accepted,
    Rejected,
    Paused,
    Closed,
    Canceled,
}

impl SubscriptionStatus {
    /// Parse a status ignoring case (`"accepted"`, `"ACCEPTED"`, ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "ACCEPTED" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            "PAUSED" => Some(Self::Paused),
            "CLOSED" => Some(Self::Closed),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Paused => "PAUSED",
            Self::Closed => "CLOSED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for SubscriptionStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SubscriptionStatus::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown subscription status: {raw}")))
    }
}

/// Consumer-side status: a consumer may stop receiving without the
/// subscription itself being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerStatus {
    #[default]
    Started,
    Stopped,
}

/// A consumer's registration for push delivery (webhook, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Owning API id, used to resolve the acceptor
    pub api: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub consumer_status: ConsumerStatus,
    /// Opaque JSON describing the entrypoint (compared byte-for-byte on re-dispatch)
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default)]
    pub starting_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ending_at: Option<DateTime<Utc>>,
    /// Re-create the running execution even when the configuration is unchanged
    #[serde(default)]
    pub force_dispatch: bool,
}

impl Subscription {
    /// Minimal accepted subscription, mostly useful to build fixtures
    pub fn new(id: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api: api.into(),
            plan: None,
            application: None,
            client_id: None,
            status: SubscriptionStatus::Accepted,
            consumer_status: ConsumerStatus::Started,
            configuration: None,
            starting_at: None,
            ending_at: None,
            force_dispatch: false,
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_consumer_status(mut self, consumer_status: ConsumerStatus) -> Self {
        self.consumer_status = consumer_status;
        self
    }

    pub fn with_window(
        mut self,
        starting_at: Option<DateTime<Utc>>,
        ending_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.starting_at = starting_at;
        self.ending_at = ending_at;
        self
    }

    pub fn with_force_dispatch(mut self, force_dispatch: bool) -> Self {
        self.force_dispatch = force_dispatch;
        self
    }

    /// True once `ending_at` is at or before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ending_at.is_some_and(|end| end <= now)
    }

    /// Accepted, started by its consumer, and not yet expired
    pub fn is_dispatchable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Accepted
            && self.consumer_status == ConsumerStatus::Started
            && !self.is_expired_at(now)
    }

    /// Same configuration bytes as `other` (no JSON normalisation)
    pub fn same_configuration(&self, other: &Subscription) -> bool {
        self.configuration == other.configuration
    }
}

/// Parsed view over [`Subscription::configuration`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfiguration {
    #[serde(default)]
    pub entrypoint_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub entrypoint_configuration: Option<serde_json::Value>,
}

impl SubscriptionConfiguration {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Entrypoint id when present and non blank
    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}
