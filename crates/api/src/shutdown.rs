use crate::state::AppState;
use crate::upstream;
use futures_util::future::join_all;
use tracing::info;

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down gracefully"),
        _ = terminate => info!("SIGTERM received, shutting down gracefully"),
    }
}

/// Empty the registry and disconnect every handle concurrently. Failures are
/// logged and ignored. Returns the number of handles that were swept.
pub async fn disconnect_all(state: &AppState) -> usize {
    let entries = state.registry.drain().await;
    let count = entries.len();
    if count == 0 {
        return 0;
    }

    info!(accounts = count, "Disconnecting all accounts");
    join_all(entries.iter().map(|(login, entry)| {
        upstream::release(&state.settings, login, entry.connection.as_ref())
    }))
    .await;
    count
}
