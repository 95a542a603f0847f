//! Wire protocol: inbound frame shapes (duck-typed on `type`) and outbound
//! frame shapes. Field-name aliasing (`robotId`/`robot_id`, `mapName`/
//! `map_name`, `poiId`/`poi_id`, `goalPoiId`/`goal_poi_id`) is preserved for
//! compatibility with the existing robot agent; the server only ever emits
//! the camelCase form.
//!
//! Unrecognised `type` values fall through to an explicit `Unknown` arm
//! (`#[serde(other)]`) so that forward compatibility is an enforced
//! behaviour rather than an accident, per the design notes.

use crate::model::{Battery, ClientId, ControlLease, Maps, Nav, Poi, Pose, RobotId, RobotRecord, Telemetry};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------
// Robot -> relay
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobotInbound {
    #[serde(alias = "register")]
    Hello(HelloPayload),
    Telemetry(TelemetryFrame),
    CommandResult(CommandResultFrame),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    #[serde(alias = "robot_id")]
    pub robot_id: Option<String>,
    pub version: Option<String>,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    #[serde(default, alias = "robot_id")]
    pub robot_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Telemetry>,
    #[serde(flatten)]
    pub flat: Telemetry,
}

impl TelemetryFrame {
    /// The payload envelope wins when present; otherwise the flat top-level
    /// fields are used, per §4.2.
    pub fn resolve(self) -> Telemetry {
        self.payload.unwrap_or(self.flat)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultFrame {
    #[serde(default, alias = "robot_id")]
    pub robot_id: Option<String>,
    pub command: Option<String>,
    pub success: Option<bool>,
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------
// Operator -> relay
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientInbound {
    Subscribe(SubscribePayload),
    Unsubscribe(SubscribePayload),
    Control(ControlFrame),
    Command(CommandFrame),
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    #[serde(default, alias = "robot_id")]
    pub robot_id: Option<String>,
    #[serde(default, alias = "client_name")]
    pub client_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFrame {
    #[serde(default, alias = "robot_id")]
    pub robot_id: Option<String>,
    pub payload: ControlActionPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlActionPayload {
    pub action: String,
    #[serde(default, alias = "client_name")]
    pub client_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFrame {
    #[serde(default, alias = "robot_id")]
    pub robot_id: Option<String>,
    pub payload: CommandPayload,
}

#[derive(Debug, Deserialize)]
pub struct CommandPayload {
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl CommandPayload {
    /// Look up a field under either of two accepted spellings (camelCase /
    /// snake_case alias), e.g. `mapName`/`map_name`.
    pub fn field(&self, camel: &str, snake: &str) -> Option<&serde_json::Value> {
        self.fields.get(camel).or_else(|| self.fields.get(snake))
    }

    pub fn str_field(&self, camel: &str, snake: &str) -> Option<&str> {
        self.field(camel, snake).and_then(|v| v.as_str())
    }

    /// Numeric coercion used by `teleop`: missing or non-numeric (including
    /// NaN/±∞, which `serde_json` would have already rejected at parse time
    /// for a literal but which can still arrive via `null` or a string) is
    /// treated as 0 before clamping, per §4.4's numeric semantics.
    pub fn numeric_field(&self, name: &str) -> f64 {
        self.fields
            .get(name)
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite())
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------
// Relay -> robot
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyConfig {
    pub telemetry_rate_hz: f64,
    pub max_linear_velocity: f64,
    pub max_angular_velocity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToRobot {
    Welcome {
        server_time: u64,
        safety: SafetyConfig,
    },
}

// ---------------------------------------------------------------------
// Relay -> operator
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ControlProjection {
    pub owner_client_id: Option<ClientId>,
    pub owner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotSummary {
    pub robot_id: RobotId,
    pub online: bool,
    pub last_seen: u64,
    pub mode: String,
    pub has_control: bool,
}

impl RobotSummary {
    pub fn from_record(robot_id: &RobotId, record: &RobotRecord) -> Self {
        Self {
            robot_id: robot_id.clone(),
            online: record.is_open(),
            last_seen: record.last_seen_at,
            mode: record.telemetry.mode.clone().unwrap_or_else(|| "unknown".to_string()),
            has_control: !record.lease.is_unowned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotProjection {
    pub robot_id: RobotId,
    pub online: bool,
    pub last_seen: u64,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<Pose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav: Option<Nav>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<Maps>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pois: Vec<Poi>,
    pub control: ControlProjection,
}

impl ControlProjection {
    pub fn from_lease(lease: &ControlLease) -> Self {
        Self {
            owner_client_id: lease.owner_client_id.clone(),
            owner_name: lease.owner_name.clone(),
            since: lease.acquired_at,
        }
    }
}

impl RobotProjection {
    pub fn from_record(robot_id: &RobotId, record: &RobotRecord) -> Self {
        let t = &record.telemetry;
        Self {
            robot_id: robot_id.clone(),
            online: record.is_open(),
            last_seen: record.last_seen_at,
            mode: t.mode.clone().unwrap_or_else(|| "unknown".to_string()),
            pose: t.pose,
            battery: t.battery,
            nav: t.nav.clone(),
            maps: t.maps.clone(),
            pois: t.pois.clone(),
            control: ControlProjection::from_lease(&record.lease),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    #[serde(rename = "robot_online")]
    RobotOnline { robot_id: RobotId },
    #[serde(rename = "robot_offline")]
    RobotOffline { robot_id: RobotId, reason: &'static str },
    #[serde(rename = "control_acquired")]
    ControlAcquired {
        robot_id: RobotId,
        owner_client_id: ClientId,
        owner_name: String,
    },
    #[serde(rename = "control_confirmed")]
    ControlConfirmed {
        robot_id: RobotId,
        owner_client_id: ClientId,
        owner_name: String,
    },
    #[serde(rename = "control_released")]
    ControlReleased {
        robot_id: RobotId,
        reason: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_owner: Option<String>,
    },
    #[serde(rename = "control_forced")]
    ControlForced {
        robot_id: RobotId,
        owner_client_id: ClientId,
        owner_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_owner: Option<String>,
    },
    #[serde(rename = "command_result")]
    CommandResult {
        robot_id: RobotId,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: serde_json::Value,
    },
    #[serde(rename = "server_shutdown")]
    ServerShutdown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToOperator {
    Welcome {
        client_id: ClientId,
        robots: Vec<RobotProjection>,
    },
    State {
        robot_id: RobotId,
        online: bool,
        mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pose: Option<Pose>,
        #[serde(skip_serializing_if = "Option::is_none")]
        battery: Option<Battery>,
        #[serde(skip_serializing_if = "Option::is_none")]
        nav: Option<Nav>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maps: Option<Maps>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        pois: Vec<Poi>,
        control: ControlProjection,
    },
    Event {
        payload: EventPayload,
    },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        holder: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        available_pois: Option<Vec<Poi>>,
    },
    Pong {
        timestamp: u64,
    },
}

impl ToOperator {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).expect("ToOperator always serializes")
    }

    /// The `state` snapshot for a known robot (§4.6's subscribe handler and
    /// the telemetry fan-out in the robot session both build this the same
    /// way).
    pub fn state_for(robot_id: &RobotId, record: &RobotRecord) -> Self {
        let t = &record.telemetry;
        ToOperator::State {
            robot_id: robot_id.clone(),
            online: record.is_open(),
            mode: t.mode.clone().unwrap_or_else(|| "unknown".to_string()),
            pose: t.pose,
            battery: t.battery,
            nav: t.nav.clone(),
            maps: t.maps.clone(),
            pois: t.pois.clone(),
            control: ControlProjection::from_lease(&record.lease),
        }
    }

    /// §4.6: the `state` snapshot sent for a `subscribe` on a RobotId the
    /// relay has never seen.
    pub fn unknown_state(robot_id: &RobotId) -> Self {
        ToOperator::State {
            robot_id: robot_id.clone(),
            online: false,
            mode: "unknown".to_string(),
            pose: None,
            battery: None,
            nav: None,
            maps: None,
            pois: Vec::new(),
            control: ControlProjection::default(),
        }
    }
}

impl ToRobot {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).expect("ToRobot always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_accepts_register_alias() {
        let v: RobotInbound =
            serde_json::from_str(r#"{"type":"register","robotId":"r1"}"#).unwrap();
        assert!(matches!(v, RobotInbound::Hello(_)));
    }

    #[test]
    fn unknown_type_falls_through() {
        let v: RobotInbound = serde_json::from_str(r#"{"type":"wat"}"#).unwrap();
        assert!(matches!(v, RobotInbound::Unknown));
    }

    #[test]
    fn telemetry_prefers_payload_over_flat_fields() {
        let frame: RobotInbound = serde_json::from_str(
            r#"{"type":"telemetry","payload":{"mode":"idle"},"mode":"nav"}"#,
        )
        .unwrap();
        let RobotInbound::Telemetry(t) = frame else {
            panic!("expected telemetry")
        };
        assert_eq!(t.resolve().mode.as_deref(), Some("idle"));
    }

    #[test]
    fn telemetry_falls_back_to_flat_fields() {
        let frame: RobotInbound = serde_json::from_str(
            r#"{"type":"telemetry","mode":"nav","battery":{"percent":42}}"#,
        )
        .unwrap();
        let RobotInbound::Telemetry(t) = frame else {
            panic!("expected telemetry")
        };
        let telemetry = t.resolve();
        assert_eq!(telemetry.mode.as_deref(), Some("nav"));
        assert_eq!(telemetry.battery.unwrap().percent, Some(42.0));
    }

    #[test]
    fn command_payload_accepts_snake_case_alias() {
        let frame: ClientInbound = serde_json::from_str(
            r#"{"type":"command","robotId":"r1","payload":{"kind":"load_map","map_name":"garage"}}"#,
        )
        .unwrap();
        let ClientInbound::Command(c) = frame else {
            panic!("expected command")
        };
        assert_eq!(c.payload.str_field("mapName", "map_name"), Some("garage"));
    }

    #[test]
    fn numeric_field_treats_non_finite_and_missing_as_zero() {
        let frame: ClientInbound = serde_json::from_str(
            r#"{"type":"command","robotId":"r1","payload":{"kind":"teleop","linear_x":null}}"#,
        )
        .unwrap();
        let ClientInbound::Command(c) = frame else {
            panic!("expected command")
        };
        assert_eq!(c.payload.numeric_field("linear_x"), 0.0);
        assert_eq!(c.payload.numeric_field("angular_z"), 0.0);
    }
}
