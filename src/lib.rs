//! Relay binary library: wires the registry, both WebSocket endpoints, the
//! HTTP surface, and the background reapers into an axum `Router`, and
//! drives graceful shutdown.
//!
//! Split out of `main.rs` the way the teacher keeps its heavier services
//! (`depot/mapper`, `depot/dispatch`) as a single binary crate, generalised
//! here only so the end-to-end test suite in `tests/` can build the same
//! router in-process via `tower::ServiceExt::oneshot` / a bound
//! `tokio::net::TcpListener` without spawning the real process.

pub mod command;
pub mod config;
pub mod error;
pub mod http;
pub mod lease;
pub mod model;
pub mod operator_ws;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod robot_ws;

use crate::config::Config;
use crate::protocol::{EventPayload, ToOperator};
use crate::registry::RelayState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Builds the application router over a shared `RelayState`. Used both by
/// `main` (bound to a real listener) and by tests (driven in-process).
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", get(http::status))
        .route("/health", get(http::health))
        .route("/robots", get(http::list_robots))
        .route("/robots/{robotId}", get(http::get_robot))
        .route("/robot", get(robot_ws::robot_ws_handler))
        .route("/ui", get(operator_ws::operator_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the relay to completion: binds `config.port`, serves the router,
/// spawns both reapers, and waits for a termination signal before emitting
/// `server_shutdown` to every connected operator (§5) and exiting.
pub async fn run(config: Config) -> std::io::Result<()> {
    let state = Arc::new(RelayState::new());

    reaper::spawn_staleness_reaper(state.clone(), config.robot_timeout);
    reaper::spawn_idle_lease_reaper(state.clone(), config.control_idle_timeout);

    let app = router(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "relay listening");

    let serve_state = state.clone();
    let serve_task = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        result = serve_task => {
            // The listener stopped on its own (bind/accept failure); propagate.
            result.expect("serve task panicked")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            serve_state
                .broadcast_to_all(&ToOperator::Event {
                    payload: EventPayload::ServerShutdown,
                })
                .await;
            Ok(())
        }
    }
}
