use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Account Records
// ---------------------------------------------------------------------------

/// A free-form JSON object as returned by the upstream service.
///
/// The gateway never interprets these fields; it caches and forwards them.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Account information (balance, equity, margin, currency, ...).
pub type AccountInformation = Record;

/// An open position.
pub type Position = Record;

/// A pending order.
pub type Order = Record;

/// A historical executed trade.
pub type Deal = Record;

// ---------------------------------------------------------------------------
// Connection Requests
// ---------------------------------------------------------------------------

/// How the upstream service hosts the terminal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Terminal hosted by the upstream provider.
    #[default]
    Cloud,
}

impl ConnectionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
        }
    }
}

/// Credentials and routing for opening an account connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Account number on the trading server.
    pub login: String,
    pub password: String,
    /// Broker trade server name (e.g. "ICMarketsSC-Demo").
    pub server: String,
    pub connection_type: ConnectionType,
}

impl ConnectRequest {
    pub fn cloud(
        login: impl Into<String>,
        password: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            server: server.into(),
            connection_type: ConnectionType::Cloud,
        }
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("server", &self.server)
            .field("connection_type", &self.connection_type)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Everything fetched for an account in one refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_information: AccountInformation,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub deals: Vec<Deal>,
}

/// Closed time range used to query deal history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl HistoryWindow {
    /// The window `[now - days, now]`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            from: now - Duration::days(i64::from(days)),
            to: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}
