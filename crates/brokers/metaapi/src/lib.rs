//! MetaApi cloud adapter.
//!
//! Talks to the MetaApi provisioning and client REST APIs to open cloud
//! terminal connections for MetaTrader accounts and read their data.

pub mod client;
pub mod protocol;

pub use client::{MetaApiClient, MetaApiConfig, MetaApiConnection};
