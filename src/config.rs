//! Environment-derived configuration.
//!
//! Follows the `PORT` convention used identically across every Depot service
//! (`std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(default)`),
//! extended with two timeout overrides so the staleness and idle-lease windows
//! can be shortened in tests without waiting out the production defaults.

use std::time::Duration;

/// Telemetry rate hint sent to newly connected robots, in Hz.
pub const TELEMETRY_RATE_HZ: f64 = 2.0;
pub const MAX_LINEAR_VELOCITY: f64 = 0.5;
pub const MAX_ANGULAR_VELOCITY: f64 = 1.5;
pub const PING_INTERVAL_MS: u64 = 30_000;
pub const STALENESS_SWEEP_PERIOD: Duration = Duration::from_secs(30);
pub const IDLE_LEASE_SWEEP_PERIOD: Duration = Duration::from_secs(10);
pub const VALID_MODES: &[&str] = &["idle", "slam", "nav", "localization"];

/// Defaults applied to a `hello`/`register` frame that omits them (§4.2).
pub const DEFAULT_ROBOT_VERSION: &str = "0.0.0";
pub const DEFAULT_ROBOT_CAPABILITIES: &[&str] = &["pose", "battery", "mode"];

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub robot_timeout: Duration,
    pub control_idle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT").unwrap_or(8080),
            robot_timeout: Duration::from_millis(env_parsed("ROBOT_TIMEOUT_MS").unwrap_or(60_000)),
            control_idle_timeout: Duration::from_millis(
                env_parsed("CONTROL_IDLE_TIMEOUT_MS").unwrap_or(60_000),
            ),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
