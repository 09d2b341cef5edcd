//! Metric naming and identity canonicalization.

pub mod canonical;

pub use canonical::{canonicalize, CanonicalError};

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::{CriteriaKind, TaxonomyError};

/// Closed set of metric names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricName {
    ObjectCount,
    AccountActivityCount,
    RebootCount,
    HashtagCount,
    UserCount,
    InventoryItemCount,
    ConnectionCount,
    MessageCount,
    SummaryValue,
    SubscriptionCount,
    AnomalyCount,
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricName::ObjectCount => "OBJECT_COUNT",
            MetricName::AccountActivityCount => "ACCOUNT_ACTIVITY_COUNT",
            MetricName::RebootCount => "REBOOT_COUNT",
            MetricName::HashtagCount => "HASHTAG_COUNT",
            MetricName::UserCount => "USER_COUNT",
            MetricName::InventoryItemCount => "INVENTORY_ITEM_COUNT",
            MetricName::ConnectionCount => "CONNECTION_COUNT",
            MetricName::MessageCount => "MESSAGE_COUNT",
            MetricName::SummaryValue => "SUMMARY_VALUE",
            MetricName::SubscriptionCount => "SUBSCRIPTION_COUNT",
            MetricName::AnomalyCount => "ANOMALY_COUNT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MetricName {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "OBJECT_COUNT" => MetricName::ObjectCount,
            "ACCOUNT_ACTIVITY_COUNT" => MetricName::AccountActivityCount,
            "REBOOT_COUNT" => MetricName::RebootCount,
            "HASHTAG_COUNT" => MetricName::HashtagCount,
            "USER_COUNT" => MetricName::UserCount,
            "INVENTORY_ITEM_COUNT" => MetricName::InventoryItemCount,
            "CONNECTION_COUNT" => MetricName::ConnectionCount,
            "MESSAGE_COUNT" => MetricName::MessageCount,
            "SUMMARY_VALUE" => MetricName::SummaryValue,
            "SUBSCRIPTION_COUNT" => MetricName::SubscriptionCount,
            "ANOMALY_COUNT" => MetricName::AnomalyCount,
            other => {
                return Err(TaxonomyError::UnknownTaxonomyValue {
                    kind: "metric name",
                    value: other.to_string(),
                })
            }
        })
    }
}

/// A metric instance before canonicalization: name plus criteria tags.
///
/// Equality is (name, criteria-set) equality; the `BTreeMap` makes it
/// independent of the order the caller inserted tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    pub name: MetricName,
    pub criteria: BTreeMap<CriteriaKind, String>,
}

impl MetricKey {
    pub fn new(name: MetricName) -> Self {
        Self {
            name,
            criteria: BTreeMap::new(),
        }
    }

    pub fn with(mut self, kind: CriteriaKind, value: impl Into<String>) -> Self {
        self.criteria.insert(kind, value.into());
        self
    }

    /// Render the canonical identity for this key.
    pub fn identity(&self) -> Result<String, CanonicalError> {
        canonicalize(self.name, &self.criteria)
    }
}

/// Extract the metric name from a canonical identity string.
///
/// Used when restoring persisted baselines: an identity whose name prefix is
/// no longer in the closed set is a taxonomy mismatch and the caller drops
/// that baseline.
pub fn metric_name_of_identity(identity: &str) -> Result<MetricName, TaxonomyError> {
    let name = identity.split('{').next().unwrap_or(identity);
    name.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_key_equality_ignores_insertion_order() {
        let a = MetricKey::new(MetricName::ConnectionCount)
            .with(CriteriaKind::Region, "us-east")
            .with(CriteriaKind::ProviderType, "aws");
        let b = MetricKey::new(MetricName::ConnectionCount)
            .with(CriteriaKind::ProviderType, "aws")
            .with(CriteriaKind::Region, "us-east");
        assert_eq!(a, b);
    }

    #[test]
    fn test_metric_name_of_identity() {
        let name = metric_name_of_identity("CONNECTION_COUNT{REGION=us-east}").unwrap();
        assert_eq!(name, MetricName::ConnectionCount);
        assert_eq!(
            metric_name_of_identity("REBOOT_COUNT").unwrap(),
            MetricName::RebootCount
        );
        assert!(metric_name_of_identity("RETIRED_METRIC{REGION=x}").is_err());
    }
}
