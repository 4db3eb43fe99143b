//! Provider Adapters
//!
//! One adapter per external data source:
//! - `adapter`: cache, rate limit, retry and budget layer over a client
//! - `client`: HTTP implementation of the `ProviderClient` port
//! - `types`: per-provider response DTOs and decoders

pub mod adapter;
pub mod client;
pub mod types;

pub use adapter::{AdapterSettings, ProviderAdapter};
pub use client::{HttpEndpoints, HttpProviderClient};
