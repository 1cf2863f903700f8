//! HTTP surface: axum router, request handlers, port binding, and the
//! shutdown sequence.
//!
//! | Route             | Method | Handler                                            |
//! |-------------------|--------|----------------------------------------------------|
//! | `/ws`             | GET    | open an SSE stream (`?device=pc|mobile` optional)  |
//! | `/ws/message`     | POST   | push one `{type, data}` message                    |
//! | `/api/segment`    | POST   | `{"content": ...}`: turn content into card(s)      |
//! | `/api/mode`       | POST   | `{"mode": "single"|"continuous"}`                  |
//! | `/api/mode/query` | GET    | answer `{"mode": ...}` and broadcast `mode_sync`   |
//! | `/api/cards`      | GET    | card history as a JSON array                       |
//! | `/api/port`       | GET    | `{"port": N}`                                      |
//!
//! Any other method on these paths answers `405`.  Bodies are parsed by hand
//! with `serde_json` so every malformed body is a `400`, whatever its
//! `Content-Type` header says.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use airinput_core::domain::origin::client_ip;
use airinput_core::protocol::{ModeRequest, ModeResponse, SegmentRequest};
use airinput_core::{
    ContentAggregator, Message, MessageError, ModeParseError, Origin, SegmentationMode,
    SegmentationModeController,
};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{sse::Sse, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::HubListener;
use crate::application::relay_service::RelayService;
use crate::domain::ServerConfig;
use crate::infrastructure::hub::{spawn_hub, HubError, HubHandle};
use crate::infrastructure::segment_timer::spawn_segment_timer;
use crate::infrastructure::send_loop::event_stream;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Request failures, mapped onto HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A remote device already holds the only remote slot.
    #[error("a mobile device is already connected, try again later")]
    Busy,

    /// The body is not valid JSON, or names an unknown kind or mode.
    #[error("invalid request: {0}")]
    Malformed(String),

    /// The path exists but not for this method.
    #[error("method not allowed")]
    WrongMethod,

    /// The hub task is gone (normally only during shutdown).
    #[error("connection hub is not running")]
    HubUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::WrongMethod => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::HubUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Rejected(_) => ApiError::Busy,
            HubError::Unavailable => ApiError::HubUnavailable,
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(e: MessageError) -> Self {
        ApiError::Malformed(e.to_string())
    }
}

impl From<ModeParseError> for ApiError {
    fn from(e: ModeParseError) -> Self {
        ApiError::Malformed(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Malformed(e.to_string())
    }
}

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// None of the ports in the range could be bound.
    #[error("no free port on {ip} in {start}..{start}+{attempts}")]
    NoFreePort {
        ip: IpAddr,
        start: u16,
        attempts: u16,
        #[source]
        source: Option<io::Error>,
    },

    /// The listener failed while serving.
    #[error("HTTP server failed: {0}")]
    Serve(#[from] io::Error),
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub relay: Arc<RelayService>,
    pub heartbeat_interval: Duration,
    pub port: u16,
}

/// Builds the router for `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(open_stream).fallback(wrong_method))
        .route("/ws/message", post(push_message).fallback(wrong_method))
        .route("/api/segment", post(request_segment).fallback(wrong_method))
        .route("/api/mode", post(change_mode).fallback(wrong_method))
        .route("/api/mode/query", get(query_mode).fallback(wrong_method))
        .route("/api/cards", get(list_cards).fallback(wrong_method))
        .route("/api/port", get(current_port).fallback(wrong_method))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    device: Option<String>,
}

async fn open_stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(forwarded, Some(peer.ip()));
    let origin = Origin::classify(ip, query.device.as_deref());

    let registration = state.hub.register(origin, ip).await?;
    let events = event_stream(registration, state.heartbeat_interval);

    Ok((
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(events),
    )
        .into_response())
}

async fn push_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let message = Message::from_json(&body)?;
    let outcome = state.relay.handle_inbound(message).await;
    debug!("inbound message: {outcome:?}");
    Ok(StatusCode::OK)
}

async fn request_segment(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: SegmentRequest = serde_json::from_slice(&body)?;
    state.relay.handle_segment_request(&request.content).await;
    Ok(StatusCode::OK)
}

async fn change_mode(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: ModeRequest = serde_json::from_slice(&body)?;
    // Validate before touching any state: an unknown mode changes nothing.
    let mode: SegmentationMode = request.mode.parse()?;
    state.relay.change_mode(mode).await;
    Ok(StatusCode::OK)
}

async fn query_mode(State(state): State<AppState>) -> Json<ModeResponse> {
    let mode = state.relay.query_mode().await;
    Json(ModeResponse {
        mode: mode.as_str().to_string(),
    })
}

async fn list_cards(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.relay.history())
}

async fn current_port(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "port": state.port }))
}

async fn wrong_method() -> ApiError {
    ApiError::WrongMethod
}

// ── Binding ───────────────────────────────────────────────────────────────────

/// Binds the first free port in `start .. start + attempts` on `ip`.
///
/// # Errors
///
/// [`ServerError::NoFreePort`] carrying the last bind error when every port
/// in the range is taken (or the range runs past 65535).
pub async fn bind_with_retry(
    ip: IpAddr,
    start: u16,
    attempts: u16,
) -> Result<(TcpListener, SocketAddr), ServerError> {
    let mut last_error = None;

    for offset in 0..attempts.max(1) {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                if offset > 0 {
                    info!("port {start} busy, using {}", addr.port());
                }
                return Ok((listener, addr));
            }
            Err(e) => {
                debug!("port {port} unavailable: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(ServerError::NoFreePort {
        ip,
        start,
        attempts,
        source: last_error,
    })
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A bound relay server, ready to run.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
    config: ServerConfig,
    hub_task: JoinHandle<()>,
}

impl RelayServer {
    /// Binds a port and starts the hub.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NoFreePort`] when no port in the configured
    /// range can be bound.
    pub async fn bind(
        config: ServerConfig,
        listener: Arc<dyn HubListener>,
    ) -> Result<Self, ServerError> {
        let (tcp, local_addr) =
            bind_with_retry(config.bind_addr, config.port_start, config.port_attempts).await?;

        let (hub, hub_task) =
            spawn_hub(config.outbox_capacity, config.hub_queue_capacity, listener);
        let relay = Arc::new(RelayService::new(
            Arc::new(ContentAggregator::new(config.aggregator())),
            Arc::new(SegmentationModeController::new(config.initial_mode)),
            Arc::new(hub.clone()),
        ));

        let state = AppState {
            hub,
            relay,
            heartbeat_interval: config.heartbeat_interval,
            port: local_addr.port(),
        };

        Ok(Self {
            listener: tcp,
            local_addr,
            state,
            config,
            hub_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> HubHandle {
        self.state.hub.clone()
    }

    pub fn relay(&self) -> Arc<RelayService> {
        Arc::clone(&self.state.relay)
    }

    /// Serves until `shutdown` completes, then shuts down in order:
    ///
    /// 1. stop the idle-segmentation timer and clear the aggregator;
    /// 2. close every stream through the hub;
    /// 3. wait `shutdown_grace` so send loops observe the close;
    /// 4. stop accepting and drain HTTP, bounded by `shutdown_timeout`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Serve`] if the listener fails.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            local_addr,
            state,
            config,
            hub_task,
        } = self;

        info!("relay listening on http://{local_addr}");

        let timer_stop = CancellationToken::new();
        let timer = spawn_segment_timer(
            Arc::clone(&state.relay),
            config.segment_tick,
            timer_stop.clone(),
        );

        let http_stop = CancellationToken::new();
        let stop = http_stop.clone();
        let app = router(state.clone());
        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
        });

        let early_exit = tokio::select! {
            _ = shutdown => None,
            result = &mut server => Some(result),
        };

        info!("shutting down");
        timer_stop.cancel();
        state.relay.shutdown();
        state.hub.close_all().await;
        tokio::time::sleep(config.shutdown_grace).await;
        http_stop.cancel();

        let served = match early_exit {
            Some(result) => result,
            None => match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "HTTP shutdown exceeded {:?}, aborting open requests",
                        config.shutdown_timeout
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            },
        };

        let _ = timer.await;
        drop(state);
        hub_task.abort();

        match served {
            Ok(result) => result.map_err(ServerError::from),
            Err(join) => {
                warn!("HTTP server task ended abnormally: {join}");
                Ok(())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
