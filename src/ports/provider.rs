//! Provider Port
//!
//! The network side of one external data source. Implementations perform a
//! single attempt per call and classify failures; rate limiting, caching,
//! retries and billing are layered on top by `ProviderAdapter`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{Address, FieldSet, Provider, TokenRecord};

/// Failure class of a provider call, drives the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// 5xx, timeout or connection failure - retried with backoff
    Transient,
    /// HTTP 429 - cooldown, then one retry
    RateLimited,
    /// 4xx other than 429 - never retried
    Client,
    /// Response body could not be decoded
    Parse,
    /// Call refused by degraded-mode budget admission
    BudgetRefused,
    /// Endpoint or limiter misconfiguration
    Config,
}

impl ProviderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderErrorKind::Transient | ProviderErrorKind::RateLimited)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Client => "client error",
            ProviderErrorKind::Parse => "parse error",
            ProviderErrorKind::BudgetRefused => "budget refused",
            ProviderErrorKind::Config => "configuration",
        };
        f.write_str(s)
    }
}

/// Error from one provider call
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{provider} {kind}: {reason}")]
pub struct ProviderError {
    pub provider: Provider,
    pub address: Option<Address>,
    pub kind: ProviderErrorKind,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: Provider, kind: ProviderErrorKind, reason: impl Into<String>) -> Self {
        Self {
            provider,
            address: None,
            kind,
            reason: reason.into(),
        }
    }

    pub fn with_address(mut self, address: &Address) -> Self {
        self.address = Some(address.clone());
        self
    }

    pub fn transient(provider: Provider, reason: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Transient, reason)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Discovery listing parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListParams {
    /// Maximum tokens to return
    pub limit: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

/// Network client for one provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider served by this client
    fn provider(&self) -> Provider;

    /// Discovery listing (new / trending tokens)
    async fn list(&self, params: &ListParams) -> Result<Vec<TokenRecord>, ProviderError>;

    /// One token; `Ok(None)` when the provider does not know it
    async fn one(&self, address: &Address, fields: FieldSet) -> Result<Option<TokenRecord>, ProviderError>;

    /// Several tokens in one call; the provider may return a subset
    async fn batch(&self, addresses: &[Address], fields: FieldSet) -> Result<Vec<TokenRecord>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderErrorKind::Transient.is_retryable());
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(!ProviderErrorKind::Client.is_retryable());
        assert!(!ProviderErrorKind::Parse.is_retryable());
        assert!(!ProviderErrorKind::BudgetRefused.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::new(Provider::Birdeye, ProviderErrorKind::Client, "HTTP 404")
            .with_address(&Address::normalize("Mint").unwrap());
        assert_eq!(err.to_string(), "birdeye client error: HTTP 404");
        assert_eq!(err.address.unwrap().as_str(), "Mint");
    }
}
