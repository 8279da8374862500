use anyhow::{Context, Result};
use clap::Parser;
use mtgate_api::{AppState, GatewaySettings};
use mtgate_brokers_metaapi::{MetaApiClient, MetaApiConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mtgate")]
#[command(about = "HTTP gateway for connecting to and reading MetaTrader accounts via MetaApi")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Interface to bind
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// MetaApi access token
    #[arg(long, env = "METAAPI_TOKEN", hide_env_values = true)]
    token: String,

    /// MetaApi provisioning API base URL
    #[arg(
        long,
        env = "METAAPI_PROVISIONING_URL",
        default_value = "https://mt-provisioning-api-v1.agiliumtrade.agiliumtrade.ai"
    )]
    provisioning_url: String,

    /// MetaApi client API base URL (region specific)
    #[arg(
        long,
        env = "METAAPI_CLIENT_URL",
        default_value = "https://mt-client-api-v1.new-york.agiliumtrade.ai"
    )]
    client_url: String,

    /// Terminal platform (mt4 or mt5)
    #[arg(long, env = "METAAPI_PLATFORM", default_value = "mt5")]
    platform: String,

    /// Deadline in seconds for each upstream call
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 60)]
    upstream_timeout_secs: u64,

    /// Deadline in seconds for a new terminal to report connected
    #[arg(long, env = "WAIT_CONNECTED_TIMEOUT_SECS", default_value_t = 300)]
    wait_connected_timeout_secs: u64,

    /// Deployment status poll interval in milliseconds
    #[arg(long, env = "METAAPI_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Days of deal history to fetch
    #[arg(long, env = "HISTORY_DAYS", default_value_t = 30)]
    history_days: u32,
}

impl Cli {
    fn metaapi_config(&self) -> MetaApiConfig {
        MetaApiConfig {
            token: self.token.clone(),
            provisioning_url: self.provisioning_url.clone(),
            client_url: self.client_url.clone(),
            platform: self.platform.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            wait_connected_timeout: Duration::from_secs(self.wait_connected_timeout_secs),
            history_days: self.history_days,
        }
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.log_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let metaapi = cli.metaapi_config();
    let settings = cli.gateway_settings();
    tracing::info!(metaapi = ?metaapi, settings = ?settings, "Starting mtgate");

    let service = MetaApiClient::new(metaapi).context("Failed to build MetaApi client")?;
    let state = Arc::new(AppState::new(Arc::new(service), settings));

    mtgate_api::start_server(state, &cli.bind_addr()).await?;

    Ok(())
}
