//! Router, shared state and the serve loop

use std::future::Future;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use relay_core::{Broker, Relay, RelayConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;

/// State shared by every handler
#[derive(Clone, Debug)]
pub struct AppState {
    /// Admits user turns and owns the broker
    pub relay: Relay,
    /// How long `/wait` parks before answering with the timeout sentinel
    pub long_poll_timeout: Duration,
    /// Largest accepted `/ask` body
    pub max_body_bytes: usize,
    /// Cancelled when the daemon starts shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State for `relay` with the timeouts and limits from `config`
    #[must_use]
    pub fn new(relay: Relay, config: &RelayConfig) -> Self {
        Self {
            relay,
            long_poll_timeout: config.long_poll_timeout,
            max_body_bytes: config.max_body_bytes,
            shutdown: CancellationToken::new(),
        }
    }

    /// The broker behind the relay
    #[must_use]
    pub fn broker(&self) -> &Broker {
        self.relay.broker()
    }
}

/// Build the HTTP surface
///
/// # Routes
///
/// - `GET /` - endpoint index
/// - `GET /wait` - long-poll for the next message
/// - `GET /recent` - channel snapshot, newest first
/// - `POST /ask` - publish a user turn and start a generation
/// - `GET /health` - broker statistics and configured providers
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::index))
        .route("/wait", get(handlers::wait))
        .route("/recent", get(handlers::recent))
        .route("/ask", post(handlers::ask))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Apply retention to every channel once per `interval` until `shutdown`
pub async fn run_sweeper(broker: Broker, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                broker.sweep();
            }
        }
    }
    tracing::debug!("Retention sweeper stopped");
}

/// Serve `state` on `listener` until `signal` resolves
///
/// On the signal, parked long-polls are released with a 503, the sweeper
/// stops and in-flight requests are drained.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    sweep_interval: Duration,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let sweeper = tokio::spawn(run_sweeper(
        state.broker().clone(),
        sweep_interval,
        shutdown.clone(),
    ));

    let app = build_router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                signal.await;
                shutdown.cancel();
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Retention sweeper task failed");
    }
    result
}
