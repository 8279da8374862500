use crate::error::{GatewayError, CONNECT_FAILED, DISCONNECT_FAILED, FETCH_FAILED};
use crate::registry::{AccountSummary, RegistryEntry};
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::upstream;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mtgate_core::{AccountInformation, ConnectRequest, Deal, Order, Position};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::info;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/connect", post(connect_account))
        .route("/account/{login}", get(get_account))
        .route("/accounts", get(list_accounts))
        .route("/disconnect/{login}", delete(disconnect_account))
        .method_not_allowed_fallback(method_not_allowed)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    success: bool,
    message: &'static str,
    timestamp: DateTime<Utc>,
    connected_accounts: usize,
    version: &'static str,
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        success: true,
        message: "Server is running",
        timestamp: Utc::now(),
        connected_accounts: state.registry.len().await,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ConnectBody {
    #[serde(default, deserialize_with = "lenient_string")]
    login: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    server: Option<String>,
}

impl ConnectBody {
    fn into_request(self) -> Result<ConnectRequest, GatewayError> {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        match (present(self.login), present(self.password), present(self.server)) {
            (Some(login), Some(password), Some(server)) => {
                Ok(ConnectRequest::cloud(login, password, server))
            }
            _ => Err(GatewayError::Validation),
        }
    }
}

/// Accept strings and numbers (account numbers are often sent unquoted);
/// anything else counts as missing.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectSummary {
    account_info: AccountInformation,
    positions: usize,
    orders: usize,
    deals: usize,
    server: String,
    login: String,
}

async fn connect_account(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConnectBody>, JsonRejection>,
) -> Result<Json<ApiResponse<ConnectSummary>>, GatewayError> {
    let request = match body {
        Ok(Json(body)) => body.into_request()?,
        Err(JsonRejection::MissingJsonContentType(_)) => return Err(GatewayError::Validation),
        Err(rejection) => return Err(GatewayError::BadRequestBody(rejection.body_text())),
    };
    let login = request.login.clone();
    let server = request.server.clone();

    let _guard = state.registry.lock(&login).await;
    info!(login = %login, server = %server, "Connecting account");

    let (connection, snapshot) =
        upstream::establish(&state.settings, state.service.as_ref(), request)
            .await
            .map_err(|e| e.during(CONNECT_FAILED))?;
    let account_id = connection.account_id().to_string();

    let entry = RegistryEntry::new(connection, snapshot.account_information.clone(), Utc::now());
    if let Some(previous) = state.registry.put(login.clone(), entry).await {
        if previous.connection.account_id() != account_id {
            upstream::release(&state.settings, &login, previous.connection.as_ref()).await;
        }
    }

    info!(
        login = %login,
        account_id = %account_id,
        positions = snapshot.positions.len(),
        orders = snapshot.orders.len(),
        deals = snapshot.deals.len(),
        "Account connected"
    );

    Ok(Json(ApiResponse::ok_with_message(
        "Account connected successfully",
        ConnectSummary {
            account_info: snapshot.account_information,
            positions: snapshot.positions.len(),
            orders: snapshot.orders.len(),
            deals: snapshot.deals.len(),
            server,
            login,
        },
    )))
}

// ---------------------------------------------------------------------------
// Account Data
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    account_info: AccountInformation,
    positions: Vec<Position>,
    orders: Vec<Order>,
    deals: Vec<Deal>,
    last_update: DateTime<Utc>,
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> Result<Json<ApiResponse<AccountData>>, GatewayError> {
    let _guard = state.registry.lock(&login).await;
    let entry = state
        .registry
        .get(&login)
        .await
        .ok_or(GatewayError::NotFound)?;

    let snapshot = upstream::fetch_snapshot(&state.settings, entry.connection.as_ref())
        .await
        .map_err(|e| e.during(FETCH_FAILED))?;

    let now = Utc::now();
    state
        .registry
        .refresh(&login, snapshot.account_information.clone(), now)
        .await;

    Ok(Json(ApiResponse::ok(AccountData {
        account_info: snapshot.account_information,
        positions: snapshot.positions,
        orders: snapshot.orders,
        deals: snapshot.deals,
        last_update: now,
    })))
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<AccountSummary>>> {
    Json(ApiResponse::ok(state.registry.list().await))
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> Result<Json<ApiResponse>, GatewayError> {
    let _guard = state.registry.lock(&login).await;
    let entry = state
        .registry
        .get(&login)
        .await
        .ok_or(GatewayError::NotFound)?;

    let result = upstream::bounded(
        "disconnect",
        state.settings.upstream_timeout,
        entry.connection.disconnect(),
    )
    .await;

    match result {
        Ok(()) => {
            state.registry.remove(&login).await;
            info!(login = %login, "Account disconnected");
            Ok(Json(ApiResponse::message("Account disconnected successfully")))
        }
        Err(e) => {
            // The handle may or may not still be live upstream.
            state.registry.mark_stale(&login).await;
            Err(e.during(DISCONNECT_FAILED))
        }
    }
}

// ---------------------------------------------------------------------------
// Fallbacks
// ---------------------------------------------------------------------------

pub async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::failure("Route not found", None)),
    )
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ApiResponse::failure("Method not allowed", None)),
    )
}
