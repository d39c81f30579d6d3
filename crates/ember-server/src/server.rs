//! HTTP + WebSocket server wiring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use ember_core::ConnectionId;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::{RelayShutdown, RelayTasks};
use crate::websocket::dispatch::{Relay, RelayEvent, RelayStats};
use crate::websocket::session::run_ws_session;

/// Capacity of the session → dispatcher event channel.
const EVENT_QUEUE: usize = 1024;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub events: mpsc::Sender<RelayEvent>,
    pub stats: watch::Receiver<RelayStats>,
    pub shutdown: Arc<RelayShutdown>,
    pub start_time: Instant,
    /// Port reported by `/health`.
    pub port: u16,
    pub max_send_queue: usize,
    pub max_message_size: usize,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the axum router. `/` is an alias of `/ws`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// A configured, not yet listening relay.
pub struct RelayServer {
    config: ServerConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<RelayShutdown>,
    start_time: Instant,
    events_tx: mpsc::Sender<RelayEvent>,
    events_rx: mpsc::Receiver<RelayEvent>,
    stats_tx: watch::Sender<RelayStats>,
    stats_rx: watch::Receiver<RelayStats>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (stats_tx, stats_rx) = watch::channel(RelayStats::default());
        Self {
            config,
            metrics,
            shutdown: Arc::new(RelayShutdown::new()),
            start_time: Instant::now(),
            events_tx,
            events_rx,
            stats_tx,
            stats_rx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Arc<RelayShutdown> {
        &self.shutdown
    }

    pub fn stats(&self) -> watch::Receiver<RelayStats> {
        self.stats_rx.clone()
    }

    /// Router bound to the configured port. No dispatcher runs until
    /// [`start`](Self::start).
    pub fn router(&self) -> Router {
        build_router(self.app_state(self.config.port))
    }

    fn app_state(&self, port: u16) -> AppState {
        AppState {
            events: self.events_tx.clone(),
            stats: self.stats_rx.clone(),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            port,
            max_send_queue: self.config.max_send_queue,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        }
    }

    /// Bind the listener and spawn the dispatcher and the accept loop.
    ///
    /// Fails only if the address cannot be bound.
    pub async fn start(self) -> Result<RelayHandle> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();

        let router = build_router(self.app_state(port));
        let token = self.shutdown.token();

        let relay = Relay::with_stats_sender(port, self.config.max_particle_count, self.stats_tx);
        let dispatcher = tokio::spawn(relay.run(
            self.events_rx,
            self.config.stats_interval(),
            token.clone(),
        ));

        let server = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay server error");
            }
        });

        info!(%local_addr, port, "relay server listening");

        Ok(RelayHandle {
            local_addr,
            stats: self.stats_rx,
            shutdown: self.shutdown,
            server,
            dispatcher,
        })
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    stats: watch::Receiver<RelayStats>,
    shutdown: Arc<RelayShutdown>,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Receiver for the dispatcher's published counters.
    pub fn stats(&self) -> watch::Receiver<RelayStats> {
        self.stats.clone()
    }

    pub fn shutdown(&self) -> &Arc<RelayShutdown> {
        &self.shutdown
    }

    /// Stop accepting, end all sessions and wait for the tasks to finish.
    pub async fn stop(self, timeout: Option<Duration>) {
        info!(port = self.port(), "stopping relay server");
        self.shutdown
            .drain(
                RelayTasks {
                    listener: self.server,
                    dispatcher: self.dispatcher,
                },
                timeout,
            )
            .await;
        info!("relay server stopped");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let id = ConnectionId::new();
    let events = state.events.clone();
    let cancel = state.shutdown.token();
    let max_send_queue = state.max_send_queue;

    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(move |e| warn!(%remote_addr, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            run_ws_session(socket, id, remote_addr, events, max_send_queue, cancel)
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = *state.stats.borrow();
    Json(health::health_check(state.start_time, &stats, state.port))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => metrics::render(&handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
