//! REST surface over [`WifiManager`].
//!
//! Every response is `{"message": ..., "code": ...}` with the HTTP status
//! equal to `code`. All routes require the `X-Api-Key` header.
//!
//! The manager's calls block, so handlers run them on the blocking pool.
//! Mutating calls hold the interface's lock for their whole duration; a
//! delete-all holds every interface.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{WifiError, WifiResult};
use crate::manager::WifiManager;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
struct ApiResponse<T> {
    message: T,
    code: u16,
}

fn reply<T: Serialize>(status: StatusCode, message: T) -> Response {
    let body = ApiResponse {
        message,
        code: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for WifiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        reply(status, self.message())
    }
}

/// Serializes mutating calls per interface.
#[derive(Default)]
pub struct InterfaceLocks {
    all: Arc<RwLock<()>>,
    interfaces: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one interface.
pub struct InterfaceGuard {
    _all: OwnedRwLockReadGuard<()>,
    _interface: OwnedMutexGuard<()>,
}

impl InterfaceLocks {
    pub async fn interface(&self, name: &str) -> InterfaceGuard {
        let all = self.all.clone().read_owned().await;
        let lock = {
            let mut interfaces = self.interfaces.lock();
            // Only the map holds an idle lock.
            interfaces.retain(|_, lock| Arc::strong_count(lock) > 1);
            interfaces.entry(name.to_string()).or_default().clone()
        };
        InterfaceGuard {
            _all: all,
            _interface: lock.lock_owned().await,
        }
    }

    /// Waits for every in-flight interface operation and blocks new ones.
    pub async fn every_interface(&self) -> OwnedRwLockWriteGuard<()> {
        self.all.clone().write_owned().await
    }
}

pub struct AppState {
    pub manager: Arc<WifiManager>,
    pub api_key: String,
    pub locks: InterfaceLocks,
}

impl AppState {
    pub fn new(manager: WifiManager, api_key: String) -> Self {
        Self {
            manager: Arc::new(manager),
            api_key,
            locks: InterfaceLocks::default(),
        }
    }
}

/// 40 hex digits from the OS random source.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ifaces", get(list_interfaces))
        .route("/networks", get(list_networks).delete(delete_all_networks))
        .route(
            "/networks/:iface/:ssid",
            post(save_network).delete(delete_network),
        )
        .route("/scan/:iface", get(scan))
        .route("/status/:iface", get(status))
        .route("/available/:iface", get(available))
        .route("/location/:ssid", get(location))
        .route("/enable/:iface", post(enable))
        .route("/disable/:iface", post(disable))
        .route("/connect/:iface/:ssid", post(connect))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(manager: WifiManager, config: &ServerConfig) -> anyhow::Result<()> {
    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None => {
            let key = generate_api_key();
            info!("api key is: {}", key);
            key
        }
    };
    let state = Arc::new(AppState::new(manager, api_key));
    let app = router(state);

    let addr = format!("{}:{}", config.bind, config.port);
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn require_api_key(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| key == state.api_key);

    if authorized {
        next.run(request).await
    } else {
        reply(StatusCode::UNAUTHORIZED, "unauthorized: wrong or missing api key")
    }
}

/// Runs a blocking manager call off the async executor.
async fn blocking<T, F>(state: &Arc<AppState>, call: F) -> WifiResult<T>
where
    F: FnOnce(&WifiManager) -> WifiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let manager = state.manager.clone();
    tokio::task::spawn_blocking(move || call(manager.as_ref()))
        .await
        .map_err(|e| WifiError::command_failed(format!("worker failed: {}", e)))?
}

#[derive(Debug, Default, Deserialize)]
struct IfacesQuery {
    #[serde(default)]
    addresses: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NetworksQuery {
    #[serde(default)]
    gps: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    db_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkBody {
    passkey: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
}

async fn list_interfaces(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IfacesQuery>,
) -> Result<Response, WifiError> {
    let interfaces = blocking(&state, move |m| m.list_interfaces(query.addresses)).await?;
    if query.addresses {
        Ok(reply(StatusCode::OK, interfaces))
    } else {
        let names: Vec<String> = interfaces.into_iter().map(|i| i.name).collect();
        Ok(reply(StatusCode::OK, names))
    }
}

async fn list_networks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NetworksQuery>,
) -> Result<Response, WifiError> {
    if query.gps {
        let records = blocking(&state, |m| m.network_records()).await?;
        Ok(reply(StatusCode::OK, records))
    } else {
        let profiles = blocking(&state, |m| m.networks()).await?;
        Ok(reply(StatusCode::OK, profiles))
    }
}

async fn scan(
    State(state): State<Arc<AppState>>,
    Path(iface): Path<String>,
) -> Result<Response, WifiError> {
    let cells = blocking(&state, move |m| m.scan(&iface)).await?;
    Ok(reply(StatusCode::OK, cells))
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(iface): Path<String>,
) -> Result<Response, WifiError> {
    let ssid = blocking(&state, move |m| Ok(m.status(&iface))).await?;
    Ok(reply(StatusCode::OK, ssid))
}

async fn available(
    State(state): State<Arc<AppState>>,
    Path(iface): Path<String>,
) -> Result<Response, WifiError> {
    let ssid = blocking(&state, move |m| m.best_known_network(&iface)).await?;
    Ok(reply(StatusCode::OK, ssid))
}

async fn location(
    State(state): State<Arc<AppState>>,
    Path(ssid): Path<String>,
) -> Result<Response, WifiError> {
    let (lat, lng) = blocking(&state, move |m| m.last_location(&ssid)).await?;
    Ok(reply(StatusCode::OK, format!("{:?},{:?}", lat, lng)))
}

async fn enable(
    State(state): State<Arc<AppState>>,
    Path(iface): Path<String>,
) -> Result<Response, WifiError> {
    let _guard = state.locks.interface(&iface).await;
    let name = iface.clone();
    blocking(&state, move |m| m.enable(&name)).await?;
    Ok(reply(StatusCode::OK, format!("enabled {}", iface)))
}

async fn disable(
    State(state): State<Arc<AppState>>,
    Path(iface): Path<String>,
) -> Result<Response, WifiError> {
    let _guard = state.locks.interface(&iface).await;
    let name = iface.clone();
    blocking(&state, move |m| m.disable(&name)).await?;
    Ok(reply(StatusCode::OK, format!("disabled {}", iface)))
}

async fn save_network(
    State(state): State<Arc<AppState>>,
    Path((iface, ssid)): Path<(String, String)>,
    body: Option<Json<NetworkBody>>,
) -> Result<Response, WifiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let _guard = state.locks.interface(&iface).await;

    let (name, network) = (iface.clone(), ssid.clone());
    let saved = blocking(&state, move |m| {
        m.save(&name, &network, body.passkey.as_deref(), body.lat, body.lng)
    })
    .await?;

    if !saved.created {
        return Err(WifiError::already_exists(saved.profile));
    }
    Ok(reply(
        StatusCode::CREATED,
        format!("created {}:{}", iface, saved.profile.name),
    ))
}

async fn connect(
    State(state): State<Arc<AppState>>,
    Path((iface, ssid)): Path<(String, String)>,
    body: Option<Json<NetworkBody>>,
) -> Result<Response, WifiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let _guard = state.locks.interface(&iface).await;

    let (name, network) = (iface.clone(), ssid.clone());
    let connection = blocking(&state, move |m| {
        m.connect(&name, &network, body.passkey.as_deref(), body.lat, body.lng)
    })
    .await?;

    Ok(reply(
        StatusCode::OK,
        format!("connected {}:{}", iface, connection.profile.name),
    ))
}

async fn delete_network(
    State(state): State<Arc<AppState>>,
    Path((iface, ssid)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response, WifiError> {
    let _guard = state.locks.interface(&iface).await;

    let (name, network) = (iface.clone(), ssid.clone());
    blocking(&state, move |m| m.delete(&name, &network, query.db_only)).await?;

    Ok(reply(StatusCode::OK, format!("deleted {}:{}", iface, ssid)))
}

async fn delete_all_networks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response, WifiError> {
    let _guard = state.locks.every_interface().await;

    let summary = blocking(&state, move |m| m.delete_all(query.db_only)).await?;
    let message = format!("deleted {}/{} schemes", summary.total, summary.deleted);

    if summary.is_complete() {
        Ok(reply(StatusCode::OK, message))
    } else {
        Err(WifiError::persistence(format!(
            "{}, not deleted: {}",
            message,
            summary.failed.join(", ")
        )))
    }
}
