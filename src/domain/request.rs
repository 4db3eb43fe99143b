//! Batch Requests
//!
//! A pending need for one field set of one token from one provider, queued by
//! the scoring pipeline or the correlator's gap detection and consumed by the
//! batch coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::token::{Address, FieldSet, Provider};

/// Request priority, used for degraded-mode admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

/// Batch grouping key
pub type GroupKey = (Provider, FieldSet, Priority);

/// Pending per-token data request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRequest {
    pub token_address: Address,
    pub provider: Provider,
    pub field_set: FieldSet,
    pub priority: Priority,
}

impl BatchRequest {
    pub fn new(token_address: Address, provider: Provider, field_set: FieldSet, priority: Priority) -> Self {
        Self {
            token_address,
            provider,
            field_set,
            priority,
        }
    }

    /// Requests sharing a group key can be served by one batch call.
    /// Priority is part of the key so a low-priority request is never
    /// admitted on the strength of a higher-priority neighbour.
    pub fn group_key(&self) -> GroupKey {
        (self.provider, self.field_set, self.priority)
    }
}

/// Kind of billed network call, as seen by budget admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Individual,
    Batch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_separates_priorities() {
        let address = Address::normalize("mint").unwrap();
        let low = BatchRequest::new(address.clone(), Provider::Birdeye, FieldSet::Activity, Priority::Low);
        let high = BatchRequest::new(address, Provider::Birdeye, FieldSet::Activity, Priority::High);

        assert_ne!(low.group_key(), high.group_key());
        assert_eq!(low.group_key(), (Provider::Birdeye, FieldSet::Activity, Priority::Low));
        assert!(Priority::Low < Priority::Normal && Priority::Normal < Priority::High);
    }
}
