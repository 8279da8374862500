use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Connector Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the upstream connection service.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Connection Service Traits
// ---------------------------------------------------------------------------

/// A live connection to a single trading account.
///
/// Handles are shared between the registry and in-flight requests, so every
/// method takes `&self`.
#[async_trait]
pub trait AccountConnection: Send + Sync {
    /// Upstream identifier of the connected account.
    fn account_id(&self) -> &str;

    /// Resolve once the terminal reports it is connected to the broker.
    async fn wait_connected(&self) -> Result<(), ConnectorError>;

    async fn account_information(&self) -> Result<AccountInformation, ConnectorError>;

    async fn positions(&self) -> Result<Vec<Position>, ConnectorError>;

    async fn orders(&self) -> Result<Vec<Order>, ConnectorError>;

    /// Deals executed between `from` and `to` inclusive.
    async fn deals_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, ConnectorError>;

    /// Release the upstream connection.
    async fn disconnect(&self) -> Result<(), ConnectorError>;
}

/// Opens account connections on the upstream service.
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn AccountConnection>, ConnectorError>;
}
