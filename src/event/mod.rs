//! Domain event model -- closed identifier and criteria taxonomies.
//!
//! Events are produced by upstream collaborators (API handlers, the CLI) and
//! consumed exactly once by the pipeline. Both taxonomies are closed enums so
//! every consumer match is checked at compile time; string-typed input is
//! validated eagerly at the boundary and rejected with
//! [`TaxonomyError::UnknownTaxonomyValue`] before an `Event` exists.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metric::MetricName;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("unknown taxonomy value '{value}' for {kind}")]
    UnknownTaxonomyValue { kind: &'static str, value: String },
}

/// Closed set of event identifiers, grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventId {
    // CRUD
    ObjectCreated,
    ObjectUpdated,
    ObjectDeleted,
    // Activity
    AccountActivity,
    // System
    SystemReboot,
    // Hashtag
    HashtagUsed,
    // User
    UserRegistered,
    UserDeleted,
    // Inventory item
    InventoryItemAdded,
    InventoryItemRemoved,
    // Connection lifecycle
    ConnectionOpened,
    ConnectionClosed,
    // Message
    MessageSent,
    // Periodic summary
    PeriodicSummary,
    // Subscription lifecycle
    SubscriptionStarted,
    SubscriptionRenewed,
    SubscriptionCancelled,
    // Anomaly (produced by the detector itself)
    StatisticallyNotable,
}

impl EventId {
    /// The metric this event feeds.
    pub fn metric_name(&self) -> MetricName {
        match self {
            EventId::ObjectCreated | EventId::ObjectUpdated | EventId::ObjectDeleted => {
                MetricName::ObjectCount
            }
            EventId::AccountActivity => MetricName::AccountActivityCount,
            EventId::SystemReboot => MetricName::RebootCount,
            EventId::HashtagUsed => MetricName::HashtagCount,
            EventId::UserRegistered | EventId::UserDeleted => MetricName::UserCount,
            EventId::InventoryItemAdded | EventId::InventoryItemRemoved => {
                MetricName::InventoryItemCount
            }
            EventId::ConnectionOpened | EventId::ConnectionClosed => MetricName::ConnectionCount,
            EventId::MessageSent => MetricName::MessageCount,
            EventId::PeriodicSummary => MetricName::SummaryValue,
            EventId::SubscriptionStarted
            | EventId::SubscriptionRenewed
            | EventId::SubscriptionCancelled => MetricName::SubscriptionCount,
            EventId::StatisticallyNotable => MetricName::AnomalyCount,
        }
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventId::ObjectCreated => "OBJECT_CREATED",
            EventId::ObjectUpdated => "OBJECT_UPDATED",
            EventId::ObjectDeleted => "OBJECT_DELETED",
            EventId::AccountActivity => "ACCOUNT_ACTIVITY",
            EventId::SystemReboot => "SYSTEM_REBOOT",
            EventId::HashtagUsed => "HASHTAG_USED",
            EventId::UserRegistered => "USER_REGISTERED",
            EventId::UserDeleted => "USER_DELETED",
            EventId::InventoryItemAdded => "INVENTORY_ITEM_ADDED",
            EventId::InventoryItemRemoved => "INVENTORY_ITEM_REMOVED",
            EventId::ConnectionOpened => "CONNECTION_OPENED",
            EventId::ConnectionClosed => "CONNECTION_CLOSED",
            EventId::MessageSent => "MESSAGE_SENT",
            EventId::PeriodicSummary => "PERIODIC_SUMMARY",
            EventId::SubscriptionStarted => "SUBSCRIPTION_STARTED",
            EventId::SubscriptionRenewed => "SUBSCRIPTION_RENEWED",
            EventId::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
            EventId::StatisticallyNotable => "STATISTICALLY_NOTABLE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EventId {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "OBJECT_CREATED" => EventId::ObjectCreated,
            "OBJECT_UPDATED" => EventId::ObjectUpdated,
            "OBJECT_DELETED" => EventId::ObjectDeleted,
            "ACCOUNT_ACTIVITY" => EventId::AccountActivity,
            "SYSTEM_REBOOT" => EventId::SystemReboot,
            "HASHTAG_USED" => EventId::HashtagUsed,
            "USER_REGISTERED" => EventId::UserRegistered,
            "USER_DELETED" => EventId::UserDeleted,
            "INVENTORY_ITEM_ADDED" => EventId::InventoryItemAdded,
            "INVENTORY_ITEM_REMOVED" => EventId::InventoryItemRemoved,
            "CONNECTION_OPENED" => EventId::ConnectionOpened,
            "CONNECTION_CLOSED" => EventId::ConnectionClosed,
            "MESSAGE_SENT" => EventId::MessageSent,
            "PERIODIC_SUMMARY" => EventId::PeriodicSummary,
            "SUBSCRIPTION_STARTED" => EventId::SubscriptionStarted,
            "SUBSCRIPTION_RENEWED" => EventId::SubscriptionRenewed,
            "SUBSCRIPTION_CANCELLED" => EventId::SubscriptionCancelled,
            "STATISTICALLY_NOTABLE" => EventId::StatisticallyNotable,
            other => {
                return Err(TaxonomyError::UnknownTaxonomyValue {
                    kind: "event identifier",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// Closed set of criteria tag kinds.
///
/// Declaration order is the canonical total order: `Ord` on this enum drives
/// the sorted rendering in [`crate::metric::canonicalize`], so reordering
/// variants changes every identity string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriteriaKind {
    AvailabilityZone,
    ConnectionId,
    Hashtag,
    CountryCode,
    MetricId,
    ObjectId,
    ObjectType,
    OsName,
    ProviderId,
    ProviderType,
    Region,
    ResourceId,
    UserId,
}

impl std::fmt::Display for CriteriaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CriteriaKind::AvailabilityZone => "AVAILABILITY_ZONE",
            CriteriaKind::ConnectionId => "CONNECTION_ID",
            CriteriaKind::Hashtag => "HASHTAG",
            CriteriaKind::CountryCode => "COUNTRY_CODE",
            CriteriaKind::MetricId => "METRIC_ID",
            CriteriaKind::ObjectId => "OBJECT_ID",
            CriteriaKind::ObjectType => "OBJECT_TYPE",
            CriteriaKind::OsName => "OS_NAME",
            CriteriaKind::ProviderId => "PROVIDER_ID",
            CriteriaKind::ProviderType => "PROVIDER_TYPE",
            CriteriaKind::Region => "REGION",
            CriteriaKind::ResourceId => "RESOURCE_ID",
            CriteriaKind::UserId => "USER_ID",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CriteriaKind {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AVAILABILITY_ZONE" => CriteriaKind::AvailabilityZone,
            "CONNECTION_ID" => CriteriaKind::ConnectionId,
            "HASHTAG" => CriteriaKind::Hashtag,
            "COUNTRY_CODE" => CriteriaKind::CountryCode,
            "METRIC_ID" => CriteriaKind::MetricId,
            "OBJECT_ID" => CriteriaKind::ObjectId,
            "OBJECT_TYPE" => CriteriaKind::ObjectType,
            "OS_NAME" => CriteriaKind::OsName,
            "PROVIDER_ID" => CriteriaKind::ProviderId,
            "PROVIDER_TYPE" => CriteriaKind::ProviderType,
            "REGION" => CriteriaKind::Region,
            "RESOURCE_ID" => CriteriaKind::ResourceId,
            "USER_ID" => CriteriaKind::UserId,
            other => {
                return Err(TaxonomyError::UnknownTaxonomyValue {
                    kind: "criteria kind",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// The object an event is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub object_id: String,
    pub object_type: String,
}

/// A domain event. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub subject: Subject,
    pub criteria: BTreeMap<CriteriaKind, String>,
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(id: EventId, timestamp: DateTime<Utc>, subject: Subject) -> Self {
        Self {
            id,
            timestamp,
            subject,
            criteria: BTreeMap::new(),
            payload: None,
        }
    }

    pub fn with_criteria(mut self, kind: CriteriaKind, value: impl Into<String>) -> Self {
        self.criteria.insert(kind, value.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The value this event contributes to its window.
    ///
    /// Count-style events contribute 1.0. `PERIODIC_SUMMARY` carries its
    /// measurement in the payload under `value`; a summary with no numeric
    /// payload degrades to 1.0 (a bare occurrence).
    pub fn sample_value(&self) -> f64 {
        match self.id {
            EventId::PeriodicSummary => self
                .payload
                .as_ref()
                .and_then(|p| p.get("value"))
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0),
            _ => 1.0,
        }
    }
}
