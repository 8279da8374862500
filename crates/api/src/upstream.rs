//! Time-bounded calls into the connection service.

use crate::error::UpstreamError;
use crate::state::GatewaySettings;
use chrono::Utc;
use mtgate_core::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run `fut` with a deadline. On expiry the future is dropped.
pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, ConnectorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(UpstreamError::from),
        Err(_) => Err(UpstreamError::Timeout {
            operation,
            after: limit,
        }),
    }
}

/// Open a connection, wait for it, and take the first snapshot.
///
/// If anything after `connect` fails the fresh handle is released before
/// the error is returned.
pub async fn establish(
    settings: &GatewaySettings,
    service: &dyn ConnectionService,
    request: ConnectRequest,
) -> Result<(Arc<dyn AccountConnection>, AccountSnapshot), UpstreamError> {
    let login = request.login.clone();
    let connection = bounded("connect", settings.upstream_timeout, service.connect(request)).await?;

    let ready = async {
        bounded(
            "wait for connection",
            settings.wait_connected_timeout,
            connection.wait_connected(),
        )
        .await?;
        fetch_snapshot(settings, connection.as_ref()).await
    }
    .await;

    match ready {
        Ok(snapshot) => Ok((connection, snapshot)),
        Err(e) => {
            release(settings, &login, connection.as_ref()).await;
            Err(e)
        }
    }
}

/// Fetch account information, positions, orders and the deal history window.
pub async fn fetch_snapshot(
    settings: &GatewaySettings,
    connection: &dyn AccountConnection,
) -> Result<AccountSnapshot, UpstreamError> {
    let limit = settings.upstream_timeout;
    let account_information =
        bounded("account information", limit, connection.account_information()).await?;
    let positions = bounded("positions", limit, connection.positions()).await?;
    let orders = bounded("orders", limit, connection.orders()).await?;

    let window = HistoryWindow::last_days(Utc::now(), settings.history_days);
    let deals = bounded(
        "deal history",
        limit,
        connection.deals_by_date_range(window.from, window.to),
    )
    .await?;

    Ok(AccountSnapshot {
        account_information,
        positions,
        orders,
        deals,
    })
}

/// Best-effort disconnect. Failures are logged and swallowed.
pub async fn release(settings: &GatewaySettings, login: &str, connection: &dyn AccountConnection) {
    match bounded("disconnect", settings.upstream_timeout, connection.disconnect()).await {
        Ok(()) => info!(
            login = %login,
            account_id = %connection.account_id(),
            "Released connection"
        ),
        Err(e) => warn!(
            login = %login,
            account_id = %connection.account_id(),
            error = %e,
            "Failed to release connection"
        ),
    }
}
