//! Command validation, clamping, and robot-bound translation (§4.4).
//!
//! The motion-kind/authorisation check and the per-kind validation are kept
//! as a pure function (`validate`) over a `CommandPayload` plus the bits of
//! state it needs (lease ownership, the robot's known POIs) so the boundary
//! behaviours in §8 are unit-testable without a running relay, the same way
//! `lease.rs` separates its transitions from the registry orchestration.

use crate::config::{MAX_ANGULAR_VELOCITY, MAX_LINEAR_VELOCITY, VALID_MODES};
use crate::model::{now_ms, ClientId, Poi, RobotId};
use crate::protocol::{CommandPayload, ToOperator};
use crate::registry::RelayState;
use serde_json::{json, Value};

const MOTION_KINDS: &[&str] = &["teleop", "goto_poi", "dock", "navigate"];

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Forward(Value),
    Error {
        code: &'static str,
        message: String,
        available_pois: Option<Vec<Poi>>,
    },
}

fn clamp(value: f64, bound: f64) -> f64 {
    value.clamp(-bound, bound)
}

/// Step 3 of §4.4: validate and translate a single command kind. Does not
/// itself check lease ownership; callers run the motion-kind authorisation
/// check (Step 2) before calling this, since that check needs the caller's
/// client id and the spec treats it as a separate step with its own error
/// code (`NO_CONTROL` vs e.g. `INVALID_MODE`).
pub fn validate(payload: &CommandPayload, known_pois: &[Poi]) -> CommandOutcome {
    match payload.kind.as_str() {
        "teleop" => {
            let linear_x = clamp(payload.numeric_field("linear_x"), MAX_LINEAR_VELOCITY);
            let angular_z = clamp(payload.numeric_field("angular_z"), MAX_ANGULAR_VELOCITY);
            CommandOutcome::Forward(json!({
                "command": "teleop",
                "linear_x": linear_x,
                "angular_z": angular_z,
            }))
        }
        "stop" => CommandOutcome::Forward(json!({ "command": "stop" })),
        "set_mode" => match payload.str_field("mode", "mode") {
            Some(mode) if VALID_MODES.contains(&mode) => {
                CommandOutcome::Forward(json!({ "command": "set_mode", "mode": mode }))
            }
            _ => CommandOutcome::Error {
                code: "INVALID_MODE",
                message: "mode must be one of idle, slam, nav, localization".into(),
                available_pois: None,
            },
        },
        "load_map" => match payload.str_field("mapName", "map_name") {
            Some(name) => CommandOutcome::Forward(json!({ "command": "load_map", "map_name": name })),
            None => missing_param("mapName"),
        },
        "save_map" => match payload.str_field("mapName", "map_name") {
            Some(name) => CommandOutcome::Forward(json!({ "command": "stop_slam", "map_name": name })),
            None => missing_param("mapName"),
        },
        "goto_poi" => match payload.str_field("poiId", "poi_id") {
            Some(poi_id) => match check_poi(poi_id, known_pois) {
                Ok(()) => CommandOutcome::Forward(json!({ "command": "go_to_poi", "poi_id": poi_id })),
                Err(e) => e,
            },
            None => missing_param("poiId"),
        },
        "cancel_nav" => CommandOutcome::Forward(json!({ "command": "cancel_nav" })),
        "start_slam" => CommandOutcome::Forward(json!({ "command": "start_slam" })),
        "restart" => CommandOutcome::Forward(json!({ "command": "restart" })),
        "dock" => CommandOutcome::Forward(json!({ "command": "dock" })),
        "navigate" => match payload.str_field("goalPoiId", "goal_poi_id") {
            Some(poi_id) => match check_poi(poi_id, known_pois) {
                Ok(()) => CommandOutcome::Forward(json!({ "command": "navigate", "goal_poi_id": poi_id })),
                Err(e) => e,
            },
            None => missing_param("goalPoiId"),
        },
        _ => CommandOutcome::Error {
            code: "UNKNOWN_COMMAND",
            message: format!("unrecognised command kind: {}", payload.kind),
            available_pois: None,
        },
    }
}

fn missing_param(name: &str) -> CommandOutcome {
    CommandOutcome::Error {
        code: "MISSING_PARAM",
        message: format!("missing required parameter: {name}"),
        available_pois: None,
    }
}

/// A robot with an empty POI catalogue accepts any id (§8's boundary case):
/// there is nothing to validate against, so the relay defers to the robot.
fn check_poi(poi_id: &str, known_pois: &[Poi]) -> Result<(), CommandOutcome> {
    if known_pois.is_empty() || known_pois.iter().any(|p| p.matches(poi_id)) {
        Ok(())
    } else {
        Err(CommandOutcome::Error {
            code: "UNKNOWN_POI",
            message: format!("no such point of interest: {poi_id}"),
            available_pois: Some(known_pois.to_vec()),
        })
    }
}

pub fn is_motion_kind(kind: &str) -> bool {
    MOTION_KINDS.contains(&kind)
}

// ---------------------------------------------------------------------
// Async orchestration against the registry
// ---------------------------------------------------------------------

fn error_to_client(code: &'static str, message: String, available_pois: Option<Vec<Poi>>) -> ToOperator {
    ToOperator::Error {
        code,
        message,
        holder: None,
        available_pois,
    }
}

pub async fn handle_command(
    state: &RelayState,
    robot_id: &RobotId,
    client_id: &ClientId,
    payload: &CommandPayload,
) {
    let robot_snapshot = state
        .with_robot(robot_id, |r| (r.lease.is_owned_by(client_id), r.telemetry.pois.clone()))
        .await;
    let Some((is_owner, known_pois)) = robot_snapshot else {
        state
            .send_to_client(client_id, &error_to_client("ROBOT_OFFLINE", "robot not connected".into(), None))
            .await;
        return;
    };

    if is_motion_kind(&payload.kind) && !is_owner {
        state
            .send_to_client(
                client_id,
                &error_to_client("NO_CONTROL", "control lease required for this command".into(), None),
            )
            .await;
        return;
    }

    match validate(payload, &known_pois) {
        CommandOutcome::Forward(body) => {
            if is_motion_kind(&payload.kind) {
                state
                    .with_robot_mut(robot_id, |r| r.lease.last_command_at = Some(now_ms()))
                    .await;
            }
            let mut frame = serde_json::Map::new();
            frame.insert("type".to_string(), json!("command"));
            if let Value::Object(fields) = body {
                frame.extend(fields);
            }
            let text = Value::Object(frame).to_string();
            state
                .with_robot(robot_id, |r| {
                    if r.is_open() {
                        let _ = r.tx.try_send(text.clone());
                    }
                })
                .await;
        }
        CommandOutcome::Error {
            code,
            message,
            available_pois,
        } => {
            state
                .send_to_client(client_id, &error_to_client(code, message, available_pois))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(kind: &str, fields: Value) -> CommandPayload {
        let mut map = fields.as_object().cloned().unwrap_or_default();
        map.insert("kind".to_string(), json!(kind));
        let frame: crate::protocol::CommandFrame = serde_json::from_value(json!({
            "robotId": "r1",
            "payload": map,
        }))
        .unwrap();
        frame.payload
    }

    #[test]
    fn teleop_clamps_to_bounds() {
        let p = payload("teleop", json!({ "linear_x": 2.0, "angular_z": -5.0 }));
        let outcome = validate(&p, &[]);
        assert_eq!(
            outcome,
            CommandOutcome::Forward(json!({ "command": "teleop", "linear_x": 0.5, "angular_z": -1.5 }))
        );
    }

    #[test]
    fn teleop_treats_non_finite_and_missing_as_zero() {
        let p = payload("teleop", json!({ "linear_x": null }));
        let outcome = validate(&p, &[]);
        assert_eq!(
            outcome,
            CommandOutcome::Forward(json!({ "command": "teleop", "linear_x": 0.0, "angular_z": 0.0 }))
        );
    }

    #[test]
    fn teleop_boundary_value_is_exact() {
        let p = payload("teleop", json!({ "linear_x": 0.5000001, "angular_z": 0.0 }));
        let outcome = validate(&p, &[]);
        assert_eq!(
            outcome,
            CommandOutcome::Forward(json!({ "command": "teleop", "linear_x": 0.5, "angular_z": 0.0 }))
        );
    }

    #[test]
    fn set_mode_rejects_wrong_case() {
        let p = payload("set_mode", json!({ "mode": "Nav" }));
        let outcome = validate(&p, &[]);
        assert!(matches!(outcome, CommandOutcome::Error { code: "INVALID_MODE", .. }));
    }

    #[test]
    fn set_mode_accepts_known_mode() {
        let p = payload("set_mode", json!({ "mode": "nav" }));
        let outcome = validate(&p, &[]);
        assert_eq!(outcome, CommandOutcome::Forward(json!({ "command": "set_mode", "mode": "nav" })));
    }

    #[test]
    fn load_map_requires_name() {
        let p = payload("load_map", json!({}));
        let outcome = validate(&p, &[]);
        assert!(matches!(outcome, CommandOutcome::Error { code: "MISSING_PARAM", .. }));
    }

    #[test]
    fn load_map_accepts_snake_case_alias() {
        let p = payload("load_map", json!({ "map_name": "garage" }));
        let outcome = validate(&p, &[]);
        assert_eq!(outcome, CommandOutcome::Forward(json!({ "command": "load_map", "map_name": "garage" })));
    }

    #[test]
    fn goto_poi_with_empty_catalogue_is_unchecked() {
        let p = payload("goto_poi", json!({ "poiId": "anything" }));
        let outcome = validate(&p, &[]);
        assert_eq!(outcome, CommandOutcome::Forward(json!({ "command": "go_to_poi", "poi_id": "anything" })));
    }

    #[test]
    fn goto_poi_with_unknown_id_on_nonempty_catalogue_errors() {
        let pois = vec![Poi {
            id: "p1".into(),
            name: Some("Kitchen".into()),
            extra: Default::default(),
        }];
        let p = payload("goto_poi", json!({ "poiId": "p2" }));
        let outcome = validate(&p, &pois);
        match outcome {
            CommandOutcome::Error {
                code: "UNKNOWN_POI",
                available_pois: Some(echoed),
                ..
            } => assert_eq!(echoed, pois),
            other => panic!("expected UNKNOWN_POI, got {other:?}"),
        }
    }

    #[test]
    fn navigate_accepts_goal_poi_alias() {
        let p = payload("navigate", json!({ "goal_poi_id": "p1" }));
        let outcome = validate(&p, &[]);
        assert_eq!(outcome, CommandOutcome::Forward(json!({ "command": "navigate", "goal_poi_id": "p1" })));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let p = payload("fly", json!({}));
        let outcome = validate(&p, &[]);
        assert!(matches!(outcome, CommandOutcome::Error { code: "UNKNOWN_COMMAND", .. }));
    }

    #[test]
    fn motion_kinds_are_exactly_the_spec_set() {
        for kind in ["teleop", "goto_poi", "dock", "navigate"] {
            assert!(is_motion_kind(kind));
        }
        for kind in ["stop", "set_mode", "load_map", "save_map", "cancel_nav", "start_slam", "restart"] {
            assert!(!is_motion_kind(kind));
        }
    }
}
