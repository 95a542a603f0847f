//! Control lease state machine (§4.3).
//!
//! Split into pure transition functions (trivially unit-testable, following
//! the `firmware/crates/state` `StateMachine::transition` style of taking a
//! `&mut` state and an event and returning what happened) and the async
//! orchestration that applies a transition against the registry and
//! broadcasts the result.

use crate::model::{now_ms, ClientId, ControlLease, RobotId};
use crate::protocol::{EventPayload, ToOperator};
use crate::registry::RelayState;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    Granted { owner_name: String },
    ConfirmedSelf { owner_name: String },
    Denied { holder: String },
    Released,
    ReleaseNoOp,
    Forced { previous_owner: Option<String> },
}

pub fn apply_request(lease: &mut ControlLease, client_id: &str, name: String, now: u64) -> ControlOutcome {
    if lease.is_unowned() {
        lease.owner_client_id = Some(client_id.to_string());
        lease.owner_name = Some(name.clone());
        lease.acquired_at = Some(now);
        lease.last_command_at = Some(now);
        ControlOutcome::Granted { owner_name: name }
    } else if lease.is_owned_by(client_id) {
        lease.last_command_at = Some(now);
        ControlOutcome::ConfirmedSelf {
            owner_name: lease.owner_name.clone().unwrap_or(name),
        }
    } else {
        ControlOutcome::Denied {
            holder: lease.owner_name.clone().unwrap_or_default(),
        }
    }
}

pub fn apply_release(lease: &mut ControlLease, client_id: &str) -> ControlOutcome {
    if lease.is_owned_by(client_id) {
        *lease = ControlLease::default();
        ControlOutcome::Released
    } else {
        ControlOutcome::ReleaseNoOp
    }
}

/// §4.3's `force` transition performs no credential check by design — this
/// reproduces that behaviour rather than inventing an authorisation layer.
pub fn apply_force(lease: &mut ControlLease, client_id: &str, name: String, now: u64) -> ControlOutcome {
    let previous_owner = lease.owner_name.clone();
    *lease = ControlLease {
        owner_client_id: Some(client_id.to_string()),
        owner_name: Some(name),
        acquired_at: Some(now),
        last_command_at: Some(now),
    };
    ControlOutcome::Forced { previous_owner }
}

/// Returns the evicted owner's name if `client_id` held the lease.
pub fn apply_owner_disconnect(lease: &mut ControlLease, client_id: &str) -> Option<String> {
    if lease.is_owned_by(client_id) {
        let owner_name = lease.owner_name.clone();
        *lease = ControlLease::default();
        Some(owner_name.unwrap_or_default())
    } else {
        None
    }
}

/// Returns the evicted owner's name if the lease was idle past `timeout`.
pub fn apply_idle_eviction(lease: &mut ControlLease, now: u64, timeout: Duration) -> Option<String> {
    let last_command_at = lease.last_command_at?;
    if now.saturating_sub(last_command_at) > timeout.as_millis() as u64 {
        let owner_name = lease.owner_name.clone().unwrap_or_default();
        *lease = ControlLease::default();
        Some(owner_name)
    } else {
        None
    }
}

// ---------------------------------------------------------------------
// Async orchestration against the registry
// ---------------------------------------------------------------------

fn error_frame(code: &'static str, message: impl Into<String>) -> ToOperator {
    ToOperator::Error {
        code,
        message: message.into(),
        holder: None,
        available_pois: None,
    }
}

pub async fn handle_control_action(
    state: &RelayState,
    robot_id: &RobotId,
    client_id: &ClientId,
    action: &str,
    client_name_hint: Option<String>,
) {
    let exists = state.with_robot(robot_id, |_| ()).await.is_some();
    if !exists {
        state
            .send_to_client(client_id, &error_frame("ROBOT_OFFLINE", "robot not connected"))
            .await;
        return;
    }

    // §3: `clientName` defaults to `Client-<clientId>`, overwritten by the
    // first `subscribe` or `control.request` that carries a name.
    if let Some(name) = &client_name_hint {
        state
            .with_client_mut(client_id, |c| c.client_name = name.clone())
            .await;
    }

    match action {
        "request" => {
            let name = resolved_name_or_client_label(state, client_id, client_name_hint).await;
            let outcome = state
                .with_robot_mut(robot_id, |r| {
                    apply_request(&mut r.lease, client_id, name.clone(), now_ms())
                })
                .await;
            let Some(outcome) = outcome else {
                state
                    .send_to_client(client_id, &error_frame("ROBOT_OFFLINE", "robot not connected"))
                    .await;
                return;
            };
            match outcome {
                ControlOutcome::Granted { owner_name } => {
                    state
                        .broadcast_to_subscribers(
                            robot_id,
                            &ToOperator::Event {
                                payload: EventPayload::ControlAcquired {
                                    robot_id: robot_id.clone(),
                                    owner_client_id: client_id.clone(),
                                    owner_name,
                                },
                            },
                        )
                        .await;
                }
                ControlOutcome::ConfirmedSelf { owner_name } => {
                    state
                        .send_to_client(
                            client_id,
                            &ToOperator::Event {
                                payload: EventPayload::ControlConfirmed {
                                    robot_id: robot_id.clone(),
                                    owner_client_id: client_id.clone(),
                                    owner_name,
                                },
                            },
                        )
                        .await;
                }
                ControlOutcome::Denied { holder } => {
                    state
                        .send_to_client(
                            client_id,
                            &ToOperator::Error {
                                code: "CONTROL_DENIED",
                                message: format!("{holder} currently holds control"),
                                holder: Some(holder),
                                available_pois: None,
                            },
                        )
                        .await;
                }
                _ => {}
            }
        }
        "release" => {
            let Some(outcome) = state
                .with_robot_mut(robot_id, |r| apply_release(&mut r.lease, client_id))
                .await
            else {
                return;
            };
            if outcome == ControlOutcome::Released {
                state
                    .broadcast_to_subscribers(
                        robot_id,
                        &ToOperator::Event {
                            payload: EventPayload::ControlReleased {
                                robot_id: robot_id.clone(),
                                reason: "requested",
                                previous_owner: None,
                            },
                        },
                    )
                    .await;
            }
            // No acknowledgement on a no-op release, matching the existing
            // server's behaviour (preserved, not "fixed" — see DESIGN.md).
        }
        "force" => {
            let name = resolved_name_or_client_label(state, client_id, client_name_hint).await;
            let Some(outcome) = state
                .with_robot_mut(robot_id, |r| apply_force(&mut r.lease, client_id, name.clone(), now_ms()))
                .await
            else {
                return;
            };
            if let ControlOutcome::Forced { previous_owner } = outcome {
                state
                    .broadcast_to_subscribers(
                        robot_id,
                        &ToOperator::Event {
                            payload: EventPayload::ControlForced {
                                robot_id: robot_id.clone(),
                                owner_client_id: client_id.clone(),
                                owner_name: name,
                                previous_owner,
                            },
                        },
                    )
                    .await;
            }
        }
        _ => {
            // Unrecognised control actions are treated like any other
            // protocol error: logged and dropped (§7).
            tracing::debug!(%action, "ignoring unknown control action");
        }
    }
}

async fn resolved_name_or_client_label(
    state: &RelayState,
    client_id: &ClientId,
    hint: Option<String>,
) -> String {
    if let Some(name) = hint {
        return name;
    }
    state
        .with_client(client_id, |c| c.client_name.clone())
        .await
        .unwrap_or_else(|| format!("Client-{client_id}"))
}

/// Owner-disconnect transition (§4.3): called once per robot the
/// disconnecting client held the lease on.
pub async fn release_on_disconnect(state: &RelayState, robot_id: &RobotId, client_id: &ClientId) {
    let evicted = state
        .with_robot_mut(robot_id, |r| apply_owner_disconnect(&mut r.lease, client_id))
        .await
        .flatten();
    if evicted.is_some() {
        state
            .broadcast_to_subscribers(
                robot_id,
                &ToOperator::Event {
                    payload: EventPayload::ControlReleased {
                        robot_id: robot_id.clone(),
                        reason: "owner_disconnected",
                        previous_owner: None,
                    },
                },
            )
            .await;
    }
}

/// Idle-lease reaper transition (§4.7).
pub async fn sweep_idle_leases(state: &RelayState, idle_timeout: Duration) {
    let now = now_ms();
    for robot_id in state.robot_ids().await {
        let evicted = state
            .with_robot_mut(&robot_id, |r| apply_idle_eviction(&mut r.lease, now, idle_timeout))
            .await
            .flatten();
        if let Some(previous_owner) = evicted {
            state
                .broadcast_to_subscribers(
                    &robot_id,
                    &ToOperator::Event {
                        payload: EventPayload::ControlReleased {
                            robot_id: robot_id.clone(),
                            reason: "idle_timeout",
                            previous_owner: Some(previous_owner),
                        },
                    },
                )
                .await;
        }
    }
}
