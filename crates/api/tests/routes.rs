//! In-process tests for the gateway endpoints.
//!
//! The router is driven with `tower::ServiceExt::oneshot` against a fake
//! connection service; no sockets are bound.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use mtgate_api::{build_router, shutdown, AppState, GatewaySettings};
use mtgate_core::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Fake connection service
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Behavior {
    connect_error: Option<String>,
    fetch_error: Option<String>,
    disconnect_error: Option<String>,
    /// Logins whose disconnect fails, independent of `disconnect_error`.
    failing_disconnects: HashSet<String>,
    panic_on_connect: Option<String>,
    hang_on_positions: bool,
}

#[derive(Default)]
struct Upstream {
    behavior: Mutex<Behavior>,
    connects: AtomicUsize,
    fetches: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Upstream {
    fn set(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.behavior.lock().unwrap());
    }

    fn fail_fetch(&self) -> Result<(), ConnectorError> {
        let fetch_error = self.behavior.lock().unwrap().fetch_error.clone();
        match fetch_error {
            Some(msg) => Err(ConnectorError::Other(msg)),
            None => Ok(()),
        }
    }
}

struct FakeService {
    upstream: Arc<Upstream>,
}

#[async_trait]
impl ConnectionService for FakeService {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn AccountConnection>, ConnectorError> {
        let (connect_error, panic_on_connect) = {
            let behavior = self.upstream.behavior.lock().unwrap();
            (behavior.connect_error.clone(), behavior.panic_on_connect.clone())
        };
        if let Some(msg) = panic_on_connect {
            panic!("{}", msg);
        }
        if let Some(msg) = connect_error {
            return Err(ConnectorError::Api {
                status: 401,
                message: msg,
            });
        }
        let n = self.upstream.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(FakeConnection {
            account_id: format!("acc-{}", n),
            login: request.login,
            upstream: self.upstream.clone(),
        }))
    }
}

struct FakeConnection {
    account_id: String,
    login: String,
    upstream: Arc<Upstream>,
}

fn record(pairs: Value) -> Record {
    match pairs {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[async_trait]
impl AccountConnection for FakeConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn wait_connected(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn account_information(&self) -> Result<AccountInformation, ConnectorError> {
        self.upstream.fail_fetch()?;
        let n = self.upstream.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(record(json!({
            "login": self.login,
            "balance": 10000,
            "currency": "USD",
            "fetch": n
        })))
    }

    async fn positions(&self) -> Result<Vec<Position>, ConnectorError> {
        let hang = self.upstream.behavior.lock().unwrap().hang_on_positions;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(vec![
            record(json!({"id": "p1", "symbol": "EURUSD"})),
            record(json!({"id": "p2", "symbol": "XAUUSD"})),
        ])
    }

    async fn orders(&self) -> Result<Vec<Order>, ConnectorError> {
        Ok(vec![record(json!({"id": "o1", "type": "ORDER_TYPE_BUY_LIMIT"}))])
    }

    async fn deals_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, ConnectorError> {
        let days = (to - from).num_days();
        Ok(vec![
            record(json!({"id": "d1", "windowDays": days})),
            record(json!({"id": "d2"})),
            record(json!({"id": "d3"})),
        ])
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let disconnect_error = {
            let behavior = self.upstream.behavior.lock().unwrap();
            behavior.disconnect_error.clone().or_else(|| {
                behavior
                    .failing_disconnects
                    .contains(&self.login)
                    .then(|| format!("{} refused to undeploy", self.login))
            })
        };
        if let Some(msg) = disconnect_error {
            return Err(ConnectorError::Other(msg));
        }
        self.upstream.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup_with(settings: GatewaySettings) -> (Arc<AppState>, Arc<Upstream>) {
    let upstream = Arc::new(Upstream::default());
    let service = Arc::new(FakeService {
        upstream: upstream.clone(),
    });
    (Arc::new(AppState::new(service, settings)), upstream)
}

fn setup() -> (Arc<AppState>, Arc<Upstream>) {
    setup_with(GatewaySettings::default())
}

async fn call(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let resp = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    call(state, req).await
}

async fn delete(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap();
    call(state, req).await
}

async fn connect(state: &Arc<AppState>, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/connect")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(state, req).await
}

fn credentials(login: &str) -> Value {
    json!({"login": login, "password": "pw", "server": "server1"})
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_returns_counts_and_registers_account() {
    let (state, upstream) = setup();

    let (status, json) = connect(&state, credentials("100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Account connected successfully");
    assert_eq!(json["data"]["login"], "100");
    assert_eq!(json["data"]["server"], "server1");
    assert_eq!(json["data"]["positions"], 2);
    assert_eq!(json["data"]["orders"], 1);
    assert_eq!(json["data"]["deals"], 3);
    assert_eq!(json["data"]["accountInfo"]["currency"], "USD");

    assert_eq!(upstream.connects.load(Ordering::SeqCst), 1);
    assert!(state.registry.get("100").await.is_some());

    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(accounts["data"].as_array().unwrap().len(), 1);
    assert_eq!(accounts["data"][0]["login"], "100");
}

#[tokio::test]
async fn test_connect_with_missing_fields_is_rejected() {
    let (state, upstream) = setup();

    for body in [
        json!({"login": "100"}),
        json!({"password": "pw", "server": "server1"}),
        json!({"login": "100", "password": "pw"}),
        json!({"login": "", "password": "pw", "server": "server1"}),
        json!({}),
    ] {
        let (status, json) = connect(&state, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Login, password, and server are required");
    }

    assert_eq!(upstream.connects.load(Ordering::SeqCst), 0);
    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(accounts["data"], json!([]));
}

#[tokio::test]
async fn test_connect_without_json_body_is_a_validation_error() {
    let (state, _) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/connect")
        .body(Body::empty())
        .unwrap();
    let (status, json) = call(&state, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Login, password, and server are required");
}

#[tokio::test]
async fn test_connect_with_malformed_json_is_rejected() {
    let (state, _) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/connect")
        .header("content-type", "application/json")
        .body(Body::from("{\"login\": "))
        .unwrap();
    let (status, json) = call(&state, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Invalid request body");
    assert!(json["error"].is_string());
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn test_connect_accepts_numeric_login() {
    let (state, _) = setup();
    let (status, json) =
        connect(&state, json!({"login": 100, "password": "pw", "server": "server1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["login"], "100");

    let (status, _) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_connect_failure_surfaces_upstream_message() {
    let (state, upstream) = setup();
    upstream.set(|b| b.connect_error = Some("Invalid auth-token".to_string()));

    let (status, json) = connect(&state, credentials("100")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Failed to connect to account");
    assert_eq!(json["error"], "Invalid auth-token");
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn test_failed_fetch_during_connect_leaves_registry_untouched() {
    let (state, upstream) = setup();
    upstream.set(|b| b.fetch_error = Some("Account not synchronized".to_string()));

    let (status, json) = connect(&state, credentials("100")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Account not synchronized");
    assert!(state.registry.is_empty().await);
    // The half-open handle was released.
    assert_eq!(upstream.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnect_replaces_entry_and_releases_old_handle() {
    let (state, upstream) = setup();
    connect(&state, credentials("100")).await;
    connect(&state, credentials("100")).await;

    assert_eq!(upstream.connects.load(Ordering::SeqCst), 2);
    assert_eq!(upstream.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(state.registry.len().await, 1);
    let entry = state.registry.get("100").await.unwrap();
    assert_eq!(entry.connection.account_id(), "acc-2");
}

// ---------------------------------------------------------------------------
// Account data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_get_unknown_account_is_not_found() {
    let (state, _) = setup();
    let (status, json) = get(&state, "/api/account/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Account not connected");
}

#[tokio::test]
async fn test_get_account_returns_full_payloads_and_refreshes_cache() {
    let (state, _) = setup();
    connect(&state, credentials("100")).await;
    let before = state.registry.get("100").await.unwrap();

    let (status, json) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["positions"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"]["orders"][0]["id"], "o1");
    assert_eq!(json["data"]["deals"].as_array().unwrap().len(), 3);
    assert_eq!(json["data"]["deals"][0]["windowDays"], 30);
    assert_eq!(json["data"]["accountInfo"]["fetch"], 2);
    assert!(json["data"]["lastUpdate"].is_string());

    let after = state.registry.get("100").await.unwrap();
    assert!(Arc::ptr_eq(&before.connection, &after.connection));
    assert_eq!(after.account_info["fetch"], 2);
    assert!(after.last_update >= before.last_update);
}

#[tokio::test]
async fn test_repeated_gets_keep_the_same_logins() {
    let (state, _) = setup();
    connect(&state, credentials("100")).await;
    connect(&state, credentials("200")).await;

    for _ in 0..3 {
        let (status, _) = get(&state, "/api/account/100").await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, accounts) = get(&state, "/api/accounts").await;
    let mut logins: Vec<String> = accounts["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["login"].as_str().unwrap().to_string())
        .collect();
    logins.sort();
    assert_eq!(logins, vec!["100", "200"]);
}

#[tokio::test]
async fn test_fetch_error_is_reported_and_entry_kept() {
    let (state, upstream) = setup();
    connect(&state, credentials("100")).await;
    upstream.set(|b| b.fetch_error = Some("Request timed out upstream".to_string()));

    let (status, json) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["message"], "Failed to fetch account data");
    assert_eq!(json["error"], "Request timed out upstream");
    assert!(state.registry.get("100").await.is_some());
}

#[tokio::test]
async fn test_slow_upstream_call_times_out() {
    let (state, upstream) = setup_with(GatewaySettings {
        upstream_timeout: Duration::from_millis(50),
        ..GatewaySettings::default()
    });
    connect(&state, credentials("100")).await;
    upstream.set(|b| b.hang_on_positions = true);

    let (status, json) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["message"], "Failed to fetch account data");
    assert_eq!(json["error"], "positions timed out after 50ms");
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_unknown_account_is_not_found() {
    let (state, upstream) = setup();
    let (status, json) = delete(&state, "/api/disconnect/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "Account not connected");
    assert_eq!(upstream.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_failure_keeps_entry_marked_stale() {
    let (state, upstream) = setup();
    connect(&state, credentials("100")).await;
    upstream.set(|b| b.disconnect_error = Some("Undeploy rejected".to_string()));

    let (status, json) = delete(&state, "/api/disconnect/100").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["message"], "Failed to disconnect account");
    assert_eq!(json["error"], "Undeploy rejected");

    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(accounts["data"][0]["login"], "100");
    assert_eq!(accounts["data"][0]["stale"], true);

    // A retry that succeeds removes it.
    upstream.set(|b| b.disconnect_error = None);
    let (status, _) = delete(&state, "/api/disconnect/100").await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn test_successful_get_clears_stale_flag() {
    let (state, upstream) = setup();
    connect(&state, credentials("100")).await;
    upstream.set(|b| b.disconnect_error = Some("Undeploy rejected".to_string()));
    delete(&state, "/api/disconnect/100").await;

    let (status, _) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.registry.get("100").await.unwrap().stale);
}

// ---------------------------------------------------------------------------
// Health, listing and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_registry_size() {
    let (state, _) = setup();
    let (status, json) = get(&state, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Server is running");
    assert_eq!(json["connectedAccounts"], 0);
    assert!(json["timestamp"].is_string());

    connect(&state, credentials("100")).await;
    connect(&state, credentials("200")).await;

    let (_, health) = get(&state, "/api/health").await;
    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(health["connectedAccounts"], 2);
    assert_eq!(accounts["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_full_account_lifecycle() {
    let (state, _) = setup();

    let (status, _) = connect(&state, credentials("100")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(accounts["data"].as_array().unwrap().len(), 1);
    assert_eq!(accounts["data"][0]["login"], "100");
    assert!(accounts["data"][0]["lastUpdate"].is_string());
    assert_eq!(accounts["data"][0]["accountInfo"]["balance"], 10000);

    let (status, json) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"]["positions"].is_array());
    assert!(json["data"]["orders"].is_array());
    assert!(json["data"]["deals"].is_array());

    let (status, json) = delete(&state, "/api/disconnect/100").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Account disconnected successfully");

    let (_, accounts) = get(&state, "/api/accounts").await;
    assert_eq!(accounts["data"], json!([]));

    let (status, _) = get(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route_returns_json_not_found() {
    let (state, _) = setup();
    let (status, json) = get(&state, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Route not found");
}

#[tokio::test]
async fn test_wrong_method_on_known_route_returns_json_envelope() {
    let (state, _) = setup();
    let (status, json) = get(&state, "/api/connect").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Method not allowed");

    let (status, json) = delete(&state, "/api/account/100").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["message"], "Method not allowed");
}

#[tokio::test]
async fn test_panicking_handler_returns_internal_error() {
    let (state, upstream) = setup();
    upstream.set(|b| b.panic_on_connect = Some("terminal exploded".to_string()));

    let (status, json) = connect(&state, credentials("100")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Internal server error");
    assert_eq!(json["error"], "terminal exploded");
    assert!(state.registry.is_empty().await);

    // The login lock was released during the unwind.
    upstream.set(|b| b.panic_on_connect = None);
    let retry = connect(&state, credentials("100"));
    let (status, _) = tokio::time::timeout(Duration::from_secs(2), retry)
        .await
        .expect("login lock still held after panic");
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_sweep_disconnects_everything() {
    let (state, upstream) = setup();
    for login in ["100", "200", "300"] {
        connect(&state, credentials(login)).await;
    }

    assert_eq!(shutdown::disconnect_all(&state).await, 3);
    assert_eq!(upstream.disconnects.load(Ordering::SeqCst), 3);
    assert!(state.registry.is_empty().await);
    assert_eq!(shutdown::disconnect_all(&state).await, 0);
}

#[tokio::test]
async fn test_shutdown_sweep_continues_past_failed_disconnect() {
    let (state, upstream) = setup();
    for login in ["100", "200", "300"] {
        connect(&state, credentials(login)).await;
    }
    upstream.set(|b| {
        b.failing_disconnects.insert("200".to_string());
    });

    assert_eq!(shutdown::disconnect_all(&state).await, 3);
    assert_eq!(upstream.disconnects.load(Ordering::SeqCst), 2);
    assert!(state.registry.is_empty().await);

    let (_, health) = get(&state, "/api/health").await;
    assert_eq!(health["connectedAccounts"], 0);
}
