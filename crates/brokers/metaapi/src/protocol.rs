use chrono::{DateTime, SecondsFormat, Utc};
use mtgate_core::Deal;
use serde::{Deserialize, Serialize};

/// Body of the provisioning call that registers and deploys an account.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest<'a> {
    pub login: &'a str,
    pub password: &'a str,
    pub server: &'a str,
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: &'a str,
    pub platform: &'a str,
    pub magic: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountResponse {
    pub id: String,
    #[serde(default)]
    pub state: Option<DeploymentState>,
}

/// Provisioning view of an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: DeploymentState,
    #[serde(default)]
    pub connection_status: ConnectionStatus,
}

impl AccountStatus {
    pub fn is_ready(&self) -> bool {
        self.state == DeploymentState::Deployed
            && self.connection_status == ConnectionStatus::Connected
    }
}

/// Deployment lifecycle of a cloud terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Created,
    Deploying,
    Deployed,
    DeployFailed,
    Undeploying,
    Undeployed,
    UndeployFailed,
    Deleting,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeploymentState {
    /// States from which the account will never reach `Deployed` without
    /// another provisioning call.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DeployFailed | Self::Undeploying | Self::Undeployed | Self::Deleting
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::DeployFailed => "DEPLOY_FAILED",
            Self::Undeploying => "UNDEPLOYING",
            Self::Undeployed => "UNDEPLOYED",
            Self::UndeployFailed => "UNDEPLOY_FAILED",
            Self::Deleting => "DELETING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Terminal-to-broker link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    DisconnectedFromBroker,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Error payload returned by MetaApi on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// History endpoints answer either with a bare array or a wrapped one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DealsResponse {
    List(Vec<Deal>),
    Wrapped { deals: Vec<Deal> },
}

impl DealsResponse {
    pub fn into_deals(self) -> Vec<Deal> {
        match self {
            Self::List(deals) | Self::Wrapped { deals } => deals,
        }
    }
}

/// Timestamps in history paths use RFC 3339 with millisecond precision.
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Human-readable upstream message for a failed response.
pub fn error_message(status: u16, body: &str) -> String {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    match (parsed.error, parsed.message) {
        (_, Some(message)) => message,
        (Some(error), None) => error,
        (None, None) if body.trim().is_empty() => format!("HTTP {}", status),
        (None, None) => format!("HTTP {}: {}", status, body.trim()),
    }
}
