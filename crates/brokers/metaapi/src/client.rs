use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mtgate_core::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::*;

const AUTH_HEADER: &str = "auth-token";
const TRANSACTION_HEADER: &str = "transaction-id";

/// Configuration for the MetaApi cloud service.
#[derive(Clone)]
pub struct MetaApiConfig {
    /// API access token.
    pub token: String,
    /// Base URL of the provisioning API (account registration and deployment).
    pub provisioning_url: String,
    /// Base URL of the regional client API (account data).
    pub client_url: String,
    /// Terminal platform ("mt4" or "mt5").
    pub platform: String,
    /// Delay between deployment status polls while waiting for a connection.
    pub poll_interval: Duration,
}

impl Default for MetaApiConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            provisioning_url: "https://mt-provisioning-api-v1.agiliumtrade.agiliumtrade.ai"
                .to_string(),
            client_url: "https://mt-client-api-v1.new-york.agiliumtrade.ai".to_string(),
            platform: "mt5".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl std::fmt::Debug for MetaApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaApiConfig")
            .field("token", &"[REDACTED]")
            .field("provisioning_url", &self.provisioning_url)
            .field("client_url", &self.client_url)
            .field("platform", &self.platform)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Authenticated JSON-over-HTTP transport shared by the service and its
/// connections.
#[derive(Clone)]
struct Transport {
    http: reqwest::Client,
    config: Arc<MetaApiConfig>,
}

impl Transport {
    fn provisioning(&self, path: &str) -> String {
        format!("{}{}", self.config.provisioning_url.trim_end_matches('/'), path)
    }

    fn client(&self, path: &str) -> String {
        format!("{}{}", self.config.client_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ConnectorError> {
        debug!(url = %url, "GET");
        let resp = self
            .http
            .get(url)
            .header(AUTH_HEADER, &self.config.token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        transaction_id: &str,
    ) -> Result<T, ConnectorError> {
        debug!(url = %url, "POST");
        let resp = self
            .http
            .post(url)
            .header(AUTH_HEADER, &self.config.token)
            .header(TRANSACTION_HEADER, transaction_id)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }

    async fn post_empty(&self, url: &str) -> Result<(), ConnectorError> {
        debug!(url = %url, "POST");
        let resp = self
            .http
            .post(url)
            .header(AUTH_HEADER, &self.config.token)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}

fn transport_error(e: reqwest::Error) -> ConnectorError {
    ConnectorError::Transport(e.to_string())
}

fn api_error(status: u16, body: &str) -> ConnectorError {
    ConnectorError::Api {
        status,
        message: error_message(status, body),
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ConnectorError> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| ConnectorError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// MetaApi cloud connection service.
///
/// `connect` registers the account with the provisioning API as a cloud
/// terminal; data calls go to the regional client API.
#[derive(Clone)]
pub struct MetaApiClient {
    transport: Transport,
}

impl MetaApiClient {
    pub fn new(config: MetaApiConfig) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mtgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport_error)?;
        Ok(Self::with_http(http, config))
    }

    pub fn with_http(http: reqwest::Client, config: MetaApiConfig) -> Self {
        Self {
            transport: Transport {
                http,
                config: Arc::new(config),
            },
        }
    }
}

#[async_trait]
impl ConnectionService for MetaApiClient {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn AccountConnection>, ConnectorError> {
        let body = CreateAccountRequest {
            login: &request.login,
            password: &request.password,
            server: &request.server,
            name: format!("{}@{}", request.login, request.server),
            connection_type: request.connection_type.as_str(),
            platform: &self.transport.config.platform,
            magic: 0,
        };
        let transaction_id = Uuid::new_v4().simple().to_string();
        let url = self.transport.provisioning("/users/current/accounts");

        let created: CreateAccountResponse =
            self.transport.post_json(&url, &body, &transaction_id).await?;
        info!(
            login = %request.login,
            server = %request.server,
            account_id = %created.id,
            "Registered MetaApi account"
        );

        Ok(Arc::new(MetaApiConnection {
            account_id: created.id,
            transport: self.transport.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle to one provisioned MetaApi account.
pub struct MetaApiConnection {
    account_id: String,
    transport: Transport,
}

impl MetaApiConnection {
    fn account_path(&self, suffix: &str) -> String {
        format!("/users/current/accounts/{}{}", self.account_id, suffix)
    }
}

#[async_trait]
impl AccountConnection for MetaApiConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Polls the deployment status until the terminal is connected. Never
    /// gives up on its own; callers bound it.
    async fn wait_connected(&self) -> Result<(), ConnectorError> {
        let url = self.transport.provisioning(&self.account_path(""));
        loop {
            let status: AccountStatus = self.transport.get_json(&url).await?;
            if status.is_ready() {
                info!(account_id = %self.account_id, "MetaApi account connected");
                return Ok(());
            }
            if status.state.is_terminal() {
                return Err(ConnectorError::ConnectionFailed(format!(
                    "account {} is {}",
                    self.account_id,
                    status.state.as_str()
                )));
            }
            debug!(
                account_id = %self.account_id,
                state = status.state.as_str(),
                "Waiting for MetaApi account to connect"
            );
            tokio::time::sleep(self.transport.config.poll_interval).await;
        }
    }

    async fn account_information(&self) -> Result<AccountInformation, ConnectorError> {
        let url = self.transport.client(&self.account_path("/account-information"));
        self.transport.get_json(&url).await
    }

    async fn positions(&self) -> Result<Vec<Position>, ConnectorError> {
        let url = self.transport.client(&self.account_path("/positions"));
        self.transport.get_json(&url).await
    }

    async fn orders(&self) -> Result<Vec<Order>, ConnectorError> {
        let url = self.transport.client(&self.account_path("/orders"));
        self.transport.get_json(&url).await
    }

    async fn deals_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, ConnectorError> {
        let path = self.account_path(&format!(
            "/history-deals/time/{}/{}",
            format_time(from),
            format_time(to)
        ));
        let url = self.transport.client(&path);
        let resp: DealsResponse = self.transport.get_json(&url).await?;
        Ok(resp.into_deals())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let url = self.transport.provisioning(&self.account_path("/undeploy"));
        self.transport.post_empty(&url).await?;
        info!(account_id = %self.account_id, "Undeployed MetaApi account");
        Ok(())
    }
}
