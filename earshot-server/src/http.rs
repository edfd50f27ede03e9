//! Admission endpoint and cell-channel routing.
//!
//! Two routes matter: `POST /join`, which derives the cell for a reported
//! position, mints a one-time session token, pre-registers it with the cell,
//! and returns the channel URL plus transport details; and
//! `GET /cell/:cell_id`, which upgrades to the cell channel and hands the
//! socket to the cell's actor. Every response carries permissive CORS
//! headers, and preflights are answered without touching any state.

use crate::{
    config::{Config, FeatureFlags, SFU_TRANSPORT_FLAG},
    registry::CellRegistry,
    relay::RelayServerResolver,
    shard::ShardConfig,
};
use axum::{
    body::Bytes,
    extract::{Path, Request, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use earshot_model::{
    geometry::CellId,
    join::{ErrorResponse, JoinRequest, JoinResponse, TransportMode},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug)]
struct AppRef {
    cells: CellRegistry,
    flags: FeatureFlags,
    relay: RelayServerResolver,
    sfu_env_default: bool,
}

/// Shared state behind the admission routes.
///
/// # Cloning
///
/// Wraps its data in an [`Arc`]; clones are cheap and share the same cells,
/// flags, and credential cache.
#[derive(Clone, Debug)]
pub struct App(Arc<AppRef>);

impl App {
    /// Create the application state with production cell tuning.
    pub fn new(config: Config) -> Self {
        Self::with_shard_config(config, ShardConfig::default())
    }

    /// Create the application state with explicit cell tuning.
    pub fn with_shard_config(config: Config, shard: ShardConfig) -> Self {
        Self(Arc::new(AppRef {
            cells: CellRegistry::new(shard),
            flags: FeatureFlags::new(),
            relay: RelayServerResolver::new(config.relay),
            sfu_env_default: config.sfu_enabled,
        }))
    }

    /// The registry of live cells.
    pub fn cells(&self) -> &CellRegistry {
        &self.0.cells
    }

    /// Runtime feature-flag overrides.
    pub fn flags(&self) -> &FeatureFlags {
        &self.0.flags
    }

    /// The relay-server resolver.
    pub fn relay(&self) -> &RelayServerResolver {
        &self.0.relay
    }

    /// Transport mode currently advertised to joining players.
    pub fn transport_mode(&self) -> TransportMode {
        if self
            .0
            .flags
            .is_enabled(SFU_TRANSPORT_FLAG, self.0.sfu_env_default)
        {
            TransportMode::Sfu
        } else {
            TransportMode::P2p
        }
    }
}

/// Build the router over the application state.
pub fn router(app: App) -> Router {
    Router::new()
        .route("/join", post(join))
        .route("/cell/:cell_id", get(cell_channel))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Admit a player: derive its cell, mint a session token, and pre-register
/// the pair with the cell.
async fn join(State(app): State<App>, headers: HeaderMap, body: Bytes) -> Response {
    let request: JoinRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(source) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid join request: {source}"),
            );
        }
    };

    if request.player_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "playerId must be a non-empty string");
    }

    if !request.position.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "position must be finite");
    }

    let cell = CellId::from_position(request.position);
    let session_token = mint_session_token();

    let shard = app.cells().get_or_spawn(cell.clone());

    if let Err(source) = shard
        .prepare(request.player_id.clone(), session_token.clone())
        .await
    {
        tracing::warn!(%cell, %source, "cell rejected pre-registration");

        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("cell rejected pre-registration: {source}"),
        );
    }

    tracing::debug!(%cell, player = %request.player_id, "admitted");

    let response = JoinResponse {
        cell_web_socket_url: cell_web_socket_url(&headers, &cell),
        cell_id: cell,
        session_token,
        transport_mode: app.transport_mode(),
        ice_servers: app.relay().resolve().await,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Upgrade to the cell channel and hand the socket to the cell's actor.
async fn cell_channel(
    State(app): State<App>,
    Path(cell_id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Ok(cell) = cell_id.parse::<CellId>() else {
        return error_response(StatusCode::NOT_FOUND, "unknown cell");
    };

    let Some(ws) = ws else {
        return error_response(
            StatusCode::UPGRADE_REQUIRED,
            "cell channel requires a websocket upgrade",
        );
    };

    let shard = app.cells().get_or_spawn(cell);

    ws.on_upgrade(move |socket| async move { shard.accept(socket) })
}

/// Answer preflights and stamp permissive CORS headers on every response.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,POST,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );

    response
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Mint a fresh random session token with 128 bits of entropy.
fn mint_session_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Derive the channel URL a client should dial, honoring forwarded headers
/// from an upstream proxy.
fn cell_web_socket_url(headers: &HeaderMap, cell: &CellId) -> String {
    let proto = first_header_value(headers, "x-forwarded-proto").unwrap_or("http");
    let host = first_header_value(headers, "x-forwarded-host")
        .or_else(|| first_header_value(headers, header::HOST.as_str()))
        .unwrap_or("localhost");

    let scheme = if proto.eq_ignore_ascii_case("https") {
        "wss"
    } else {
        "ws"
    };

    format!("{scheme}://{host}/cell/{cell}")
}

/// First comma-separated element of a header, if present and non-empty.
fn first_header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();

    (!first.is_empty()).then_some(first)
}
