use crate::registry::Registry;
use mtgate_core::ConnectionService;
use std::sync::Arc;
use std::time::Duration;

/// Time limits and history window applied to upstream calls.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Deadline for each data fetch, connect and disconnect call.
    pub upstream_timeout: Duration,
    /// Deadline for the terminal to report it is connected.
    pub wait_connected_timeout: Duration,
    /// Days of deal history fetched on connect and refresh.
    pub history_days: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(60),
            wait_connected_timeout: Duration::from_secs(300),
            history_days: 30,
        }
    }
}

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub registry: Registry,
    pub service: Arc<dyn ConnectionService>,
    pub settings: GatewaySettings,
}

impl AppState {
    pub fn new(service: Arc<dyn ConnectionService>, settings: GatewaySettings) -> Self {
        Self {
            registry: Registry::new(),
            service,
            settings,
        }
    }
}
