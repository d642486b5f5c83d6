//! Stub OSB broker
//!
//! A configurable broker the tests register against the service manager:
//! catalog body, response status and artificial delay are all overridable at
//! runtime, and every endpoint counts its invocations so tests can assert
//! how often the manager called out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::catalogs::random_catalog;

#[derive(Debug)]
pub struct BrokerServerState {
    pub username: String,
    pub password: String,
    pub catalog: Value,
    pub catalog_status: StatusCode,
    pub catalog_delay: Option<Duration>,
    pub catalog_requests: usize,
    pub provision_status: StatusCode,
    pub provision_body: Value,
    pub provision_requests: usize,
    pub last_operation_state: String,
    pub last_operation_requests: usize,
}

impl Default for BrokerServerState {
    fn default() -> Self {
        BrokerServerState {
            username: "buser".to_string(),
            password: "bpassword".to_string(),
            catalog: random_catalog(),
            catalog_status: StatusCode::OK,
            catalog_delay: None,
            catalog_requests: 0,
            provision_status: StatusCode::CREATED,
            provision_body: json!({}),
            provision_requests: 0,
            last_operation_state: "succeeded".to_string(),
            last_operation_requests: 0,
        }
    }
}

#[derive(Clone)]
pub struct BrokerServer {
    addr: SocketAddr,
    state: Arc<Mutex<BrokerServerState>>,
    handle: Arc<JoinHandle<()>>,
}

impl BrokerServer {
    pub async fn start() -> BrokerServer {
        Self::start_with_catalog(random_catalog()).await
    }

    pub async fn start_with_catalog(catalog: Value) -> BrokerServer {
        let state = Arc::new(Mutex::new(BrokerServerState {
            catalog,
            ..BrokerServerState::default()
        }));

        let app = Router::new()
            .route("/v2/catalog", get(catalog_handler))
            .route(
                "/v2/service_instances/:id",
                put(provision_handler).delete(deprovision_handler),
            )
            .route(
                "/v2/service_instances/:id/last_operation",
                get(last_operation_handler),
            )
            .route(
                "/v2/service_instances/:id/service_bindings/:binding_id",
                put(bind_handler).delete(unbind_handler),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub broker failed to bind");
        let addr = listener.local_addr().expect("stub broker has no local addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        BrokerServer {
            addr,
            state,
            handle: Arc::new(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn credentials(&self) -> (String, String) {
        let state = self.state.lock().await;
        (state.username.clone(), state.password.clone())
    }

    pub async fn set_credentials(&self, username: &str, password: &str) {
        let mut state = self.state.lock().await;
        state.username = username.to_string();
        state.password = password.to_string();
    }

    pub async fn catalog(&self) -> Value {
        self.state.lock().await.catalog.clone()
    }

    pub async fn set_catalog(&self, catalog: Value) {
        self.state.lock().await.catalog = catalog;
    }

    pub async fn set_catalog_status(&self, status: StatusCode) {
        self.state.lock().await.catalog_status = status;
    }

    /// Delays the catalog response, e.g. beyond the client's
    /// response-header timeout.
    pub async fn set_catalog_delay(&self, delay: Duration) {
        self.state.lock().await.catalog_delay = Some(delay);
    }

    pub async fn set_provision_response(&self, status: StatusCode, body: Value) {
        let mut state = self.state.lock().await;
        state.provision_status = status;
        state.provision_body = body;
    }

    pub async fn catalog_request_count(&self) -> usize {
        self.state.lock().await.catalog_requests
    }

    pub async fn provision_request_count(&self) -> usize {
        self.state.lock().await.provision_requests
    }

    pub async fn reset_call_history(&self) {
        let mut state = self.state.lock().await;
        state.catalog_requests = 0;
        state.provision_requests = 0;
        state.last_operation_requests = 0;
    }

    pub fn close(&self) {
        self.handle.abort();
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        if Arc::strong_count(&self.handle) == 1 {
            self.handle.abort();
        }
    }
}

fn authorized(state: &BrokerServerState, headers: &HeaderMap) -> bool {
    let expected = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", state.username, state.password));
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Basic {}", expected))
        .unwrap_or(false)
}

async fn catalog_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body, delay) = {
        let mut state = state.lock().await;
        state.catalog_requests += 1;
        if !authorized(&state, &headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
        }
        (state.catalog_status, state.catalog.clone(), state.catalog_delay)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    (status, Json(body))
}

async fn provision_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut state = state.lock().await;
    state.provision_requests += 1;
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
    }
    (state.provision_status, Json(state.provision_body.clone()))
}

async fn deprovision_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let state = state.lock().await;
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
    }
    (StatusCode::OK, Json(json!({})))
}

async fn last_operation_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut state = state.lock().await;
    state.last_operation_requests += 1;
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
    }
    (
        StatusCode::OK,
        Json(json!({"state": state.last_operation_state})),
    )
}

async fn bind_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let state = state.lock().await;
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
    }
    (
        StatusCode::CREATED,
        Json(json!({"credentials": {"user": "u", "pass": "p"}})),
    )
}

async fn unbind_handler(
    State(state): State<Arc<Mutex<BrokerServerState>>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let state = state.lock().await;
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"description": "unauthorized"})));
    }
    (StatusCode::OK, Json(json!({})))
}
