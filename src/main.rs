//! Relay between rover agents and operator consoles.
//!
//! Endpoints:
//! - WebSocket: /robot - rover agents register, stream telemetry, report command results
//! - WebSocket: /ui - operator consoles subscribe, request control, send commands
//! - HTTP: GET / - status summary, GET /health, GET /robots, GET /robots/:robotId

use relay::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay=info".into()),
        )
        .init();

    let config = Config::from_env();
    if let Err(e) = relay::run(config).await {
        tracing::error!(error = %e, "relay terminated");
        std::process::exit(1);
    }
}
