//! `/robot` WebSocket endpoint: hello/register, telemetry, command results.
//!
//! Structurally this is `depot/dispatch`'s `handle_rover_ws` generalised:
//! same split-socket-plus-writer-task shape, same "parse by `type`, match,
//! mutate state, broadcast" loop, same cleanup-on-disconnect tail. The
//! difference is what gets registered (a full `RobotRecord` with a lease and
//! telemetry, not just a rover id) and what the disconnect path does
//! (compare-and-remove instead of an unconditional `remove`).

use crate::config::{
    DEFAULT_ROBOT_CAPABILITIES, DEFAULT_ROBOT_VERSION, MAX_ANGULAR_VELOCITY, MAX_LINEAR_VELOCITY,
    PING_INTERVAL_MS, TELEMETRY_RATE_HZ,
};
use crate::model::{now_ms, RobotId, DEFAULT_ROBOT_ID};
use crate::protocol::{EventPayload, RobotInbound, SafetyConfig, ToOperator, ToRobot};
use crate::registry::{outbound_channel, RelayState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

pub async fn robot_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        // Bootstrap this session's own `AbortHandle` into itself (the
        // handle is only available from the `JoinHandle` returned by the
        // spawn that starts the session, so it's delivered over a oneshot)
        // so a superseding `hello` for the same robot id can terminate this
        // socket outright (§4.1) rather than just dropping the registry's
        // reference to it.
        let (abort_tx, abort_rx) = oneshot::channel();
        let task = tokio::spawn(handle_robot_ws(socket, state, abort_rx));
        let _ = abort_tx.send(task.abort_handle());
    })
}

async fn handle_robot_ws(socket: WebSocket, state: Arc<RelayState>, own_abort: oneshot::Receiver<AbortHandle>) {
    let Ok(own_abort) = own_abort.await else {
        return;
    };

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = outbound_channel();

    // Transport-level liveness (§5): a periodic ping alongside draining the
    // outbound queue. A peer that stops answering pings has the underlying
    // send fail, which ends this task same as a closed queue would.
    let send_task = tokio::spawn(async move {
        let mut ping_tick = tokio::time::interval(std::time::Duration::from_millis(PING_INTERVAL_MS));
        ping_tick.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                text = rx.recv() => {
                    let Some(text) = text else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_tick.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // (robotId, generation) once a `hello`/`register` has been processed.
    let mut registered: Option<(RobotId, u64)> = None;

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => continue,
            Err(e) => {
                warn!(error = %e, "robot socket error");
                break;
            }
        };

        match serde_json::from_str::<RobotInbound>(&text) {
            Ok(RobotInbound::Hello(payload)) => {
                let robot_id = payload.robot_id.unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                let version = payload.version.unwrap_or_else(|| DEFAULT_ROBOT_VERSION.to_string());
                let capabilities = payload.capabilities.unwrap_or_else(|| {
                    DEFAULT_ROBOT_CAPABILITIES.iter().map(|s| s.to_string()).collect()
                });

                let generation = state
                    .upsert_robot(robot_id.clone(), tx.clone(), own_abort.clone(), version, capabilities)
                    .await;
                registered = Some((robot_id.clone(), generation));
                info!(%robot_id, "robot registered");

                let welcome = ToRobot::Welcome {
                    server_time: now_ms(),
                    safety: SafetyConfig {
                        telemetry_rate_hz: TELEMETRY_RATE_HZ,
                        max_linear_velocity: MAX_LINEAR_VELOCITY,
                        max_angular_velocity: MAX_ANGULAR_VELOCITY,
                    },
                };
                let _ = tx.try_send(welcome.to_json_string());

                state
                    .broadcast_to_all(&ToOperator::Event {
                        payload: EventPayload::RobotOnline {
                            robot_id: robot_id.clone(),
                        },
                    })
                    .await;
            }
            Ok(RobotInbound::Telemetry(frame)) => {
                let Some((robot_id, _)) = registered.clone() else {
                    debug!("telemetry received before hello, dropping");
                    continue;
                };
                let telemetry = frame.resolve();
                state
                    .with_robot_mut(&robot_id, |r| {
                        r.last_seen_at = now_ms();
                        r.telemetry = telemetry;
                    })
                    .await;

                if let Some(event) = state.with_robot(&robot_id, |r| ToOperator::state_for(&robot_id, r)).await {
                    state.broadcast_to_subscribers(&robot_id, &event).await;
                }
            }
            Ok(RobotInbound::CommandResult(frame)) => {
                let robot_id = frame
                    .robot_id
                    .or_else(|| registered.as_ref().map(|(id, _)| id.clone()))
                    .unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                state
                    .broadcast_to_subscribers(
                        &robot_id,
                        &ToOperator::Event {
                            payload: EventPayload::CommandResult {
                                robot_id: robot_id.clone(),
                                command: frame.command,
                                success: frame.success,
                                message: frame.message,
                                timestamp: frame.timestamp.unwrap_or_else(|| now_ms().into()),
                            },
                        },
                    )
                    .await;
            }
            Ok(RobotInbound::Unknown) => {
                debug!("ignoring unrecognised robot frame type");
            }
            Err(e) => {
                warn!(error = %e, "failed to parse robot frame");
            }
        }
    }

    if let Some((robot_id, generation)) = registered {
        if state.remove_robot_if(&robot_id, generation).await {
            info!(%robot_id, "robot disconnected");
            state
                .broadcast_to_all(&ToOperator::Event {
                    payload: EventPayload::RobotOffline {
                        robot_id: robot_id.clone(),
                        reason: "disconnected",
                    },
                })
                .await;
        }
    }

    send_task.abort();
}
