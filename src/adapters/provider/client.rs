//! HTTP Provider Client
//!
//! `ProviderClient` over a provider's HTTP JSON API. One attempt per call;
//! failures are classified for the adapter's retry policy:
//! - 429 -> `RateLimited`
//! - 5xx, timeouts, connection failures -> `Transient`
//! - 404 on a single-token lookup -> `Ok(None)`
//! - other 4xx -> `Client`
//! - undecodable body -> `Parse`

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;

use super::types;
use crate::domain::{Address, FieldSet, Provider, TokenRecord};
use crate::ports::{ListParams, ProviderClient, ProviderError, ProviderErrorKind};

/// Endpoint layout of one provider's API
///
/// Path templates may use `{address}`, `{addresses}` (comma separated),
/// `{network}` and `{limit}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpEndpoints {
    pub base_url: String,
    pub network: String,
    /// Discovery listing; `None` if the provider has no listing endpoint
    pub list_path: Option<String>,
    /// Per-field-set single-token paths, falling back to `one_path`
    pub one_path: String,
    pub field_paths: BTreeMap<FieldSet, String>,
    /// Multi-token endpoint; `None` if the provider cannot batch
    pub batch_path: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// reqwest-backed provider client
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    provider: Provider,
    http: Client,
    endpoints: HttpEndpoints,
}

impl HttpProviderClient {
    pub fn new(provider: Provider, endpoints: HttpEndpoints) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(endpoints.timeout)
            .build()
            .map_err(|e| ProviderError::new(provider, ProviderErrorKind::Config, e.to_string()))?;
        Ok(Self {
            provider,
            http,
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &HttpEndpoints {
        &self.endpoints
    }

    fn url(&self, template: &str, addresses: &[Address], limit: usize) -> String {
        let joined = addresses.iter().map(Address::as_str).collect::<Vec<_>>().join(",");
        let first = addresses.first().map(Address::as_str).unwrap_or_default();
        let path = template
            .replace("{network}", &self.endpoints.network)
            .replace("{addresses}", &joined)
            .replace("{address}", first)
            .replace("{limit}", &limit.to_string());
        format!("{}{}", self.endpoints.base_url.trim_end_matches('/'), path)
    }

    fn error(&self, kind: ProviderErrorKind, reason: impl Into<String>) -> ProviderError {
        ProviderError::new(self.provider, kind, reason)
    }

    /// GET `url`; `Ok(None)` on 404
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        let mut request = self.http.get(url).header("accept", "application/json");
        if let Some(key) = &self.endpoints.api_key {
            request = request.header(self.endpoints.api_key_header.as_str(), key.as_str());
        }
        for (name, value) in &self.endpoints.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() || e.is_request() {
                ProviderErrorKind::Transient
            } else {
                ProviderErrorKind::Client
            };
            self.error(kind, format!("request failed: {}", e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if let Some(kind) = classify_status(status) {
            return Err(self.error(kind, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.error(ProviderErrorKind::Transient, format!("body read failed: {}", e)))?;
        Ok(Some(body.to_vec()))
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<TokenRecord>, ProviderError> {
        types::decode(self.provider, body, Utc::now()).map_err(|e| self.error(ProviderErrorKind::Parse, e))
    }
}

/// Failure class for a non-success status, `None` on success
pub fn classify_status(status: StatusCode) -> Option<ProviderErrorKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderErrorKind::RateLimited)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Some(ProviderErrorKind::Transient)
    } else {
        Some(ProviderErrorKind::Client)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<TokenRecord>, ProviderError> {
        let template = self
            .endpoints
            .list_path
            .as_deref()
            .ok_or_else(|| self.error(ProviderErrorKind::Config, "no listing endpoint configured"))?;
        let url = self.url(template, &[], params.limit);
        let Some(body) = self.get(&url).await? else {
            return Err(self.error(ProviderErrorKind::Client, "listing endpoint returned 404"));
        };
        let mut records = self.decode(&body)?;
        records.truncate(params.limit);
        Ok(records)
    }

    async fn one(&self, address: &Address, fields: FieldSet) -> Result<Option<TokenRecord>, ProviderError> {
        let template = self
            .endpoints
            .field_paths
            .get(&fields)
            .unwrap_or(&self.endpoints.one_path);
        let url = self.url(template, std::slice::from_ref(address), 1);
        let Some(body) = self.get(&url).await? else {
            return Ok(None);
        };
        let records = self.decode(&body).map_err(|e| e.with_address(address))?;
        Ok(records.into_iter().find(|r| &r.address == address))
    }

    async fn batch(&self, addresses: &[Address], _fields: FieldSet) -> Result<Vec<TokenRecord>, ProviderError> {
        let template = self
            .endpoints
            .batch_path
            .as_deref()
            .ok_or_else(|| self.error(ProviderErrorKind::Config, "provider does not support batch calls"))?;
        let url = self.url(template, addresses, addresses.len());
        match self.get(&url).await? {
            Some(body) => self.decode(&body),
            None => Ok(Vec::new()),
        }
    }
}
