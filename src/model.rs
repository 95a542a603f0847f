//! Core data model: robots, clients, telemetry, and the control lease.
//!
//! Mirrors §3 of the design doc. `RobotId`/`ClientId` stay plain `String`s the
//! way the teacher's rover ids are plain `String`s throughout `depot/dispatch`
//! and `depot/discovery` — there is no parsing or validation beyond "non-empty,
//! reasonably short" and a newtype would only add ceremony.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type RobotId = String;
pub type ClientId = String;

/// Default robot id used when a frame omits `robotId`/`robot_id`, preserved
/// for wire compatibility with the existing robot agent.
pub const DEFAULT_ROBOT_ID: &str = "fordward";

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub theta: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Battery {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub voltage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Nav {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "current_goal_poi_id")]
    pub current_goal_poi_id: Option<String>,
    #[serde(default, alias = "last_result")]
    pub last_result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Maps {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub available: Vec<String>,
}

/// A point of interest. Only `id`/`name` are consulted by command validation
/// (§4.4's `goto_poi`/`navigate` catalogue check); anything else a robot
/// reports rides along opaquely so it can be echoed back in `UNKNOWN_POI`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Poi {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Poi {
    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.name.as_deref() == Some(needle)
    }
}

/// Last-known telemetry snapshot. Treated as opaque beyond the POI list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    #[serde(default, alias = "state")]
    pub mode: Option<String>,
    #[serde(default)]
    pub pose: Option<Pose>,
    #[serde(default)]
    pub battery: Option<Battery>,
    #[serde(default)]
    pub nav: Option<Nav>,
    #[serde(default)]
    pub maps: Option<Maps>,
    #[serde(default)]
    pub pois: Vec<Poi>,
}

/// Exclusive control lease over a single robot. Unowned is all-`None`.
#[derive(Debug, Clone, Default)]
pub struct ControlLease {
    pub owner_client_id: Option<ClientId>,
    pub owner_name: Option<String>,
    pub acquired_at: Option<u64>,
    pub last_command_at: Option<u64>,
}

impl ControlLease {
    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.owner_client_id.as_deref() == Some(client_id)
    }

    pub fn is_unowned(&self) -> bool {
        self.owner_client_id.is_none()
    }
}

/// A frame queued for delivery to a session's socket. The writer task
/// (§9C) drains this channel into the real `SplitSink`; nothing else ever
/// touches the socket directly.
pub type OutboundTx = mpsc::Sender<String>;

/// Bound on each session's outbound queue. Sized generously above the 2 Hz
/// telemetry hint (§6) so a momentary stall doesn't immediately start
/// dropping frames, while still being finite per §4.5/§9C.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// One connected robot. Lives in the registry keyed by `RobotId`.
pub struct RobotRecord {
    pub tx: OutboundTx,
    /// Handle to the session task that owns the real socket. Aborting it
    /// terminates that socket outright, so a reconnect can supersede a
    /// still-open prior session (§3 invariant 1) rather than merely
    /// dropping the registry's reference to it.
    pub abort: AbortHandle,
    /// Bumped on every upsert for this id; backs compare-and-remove (§4.1)
    /// since `mpsc::Sender` has no useful equality.
    pub generation: u64,
    pub version: String,
    pub capabilities: Vec<String>,
    pub last_seen_at: u64,
    pub telemetry: Telemetry,
    pub lease: ControlLease,
}

impl RobotRecord {
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One connected operator. Lives in the registry keyed by `ClientId`.
pub struct ClientRecord {
    pub tx: OutboundTx,
    pub client_id: ClientId,
    pub client_name: String,
    pub subscriptions: HashSet<RobotId>,
    pub connected_at: u64,
}

impl ClientRecord {
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
