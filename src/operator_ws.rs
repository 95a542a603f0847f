//! `/ui` WebSocket endpoint: operator consoles.
//!
//! Same split-socket-plus-writer-task shape as `robot_ws.rs` and as the
//! teacher's `handle_console_ws`, but unlike the teacher's console (a pure
//! broadcast subscriber) an operator here is individually addressable:
//! subscriptions, control actions, and command dispatch all target this
//! one session, so replies go through `send_to_client` rather than only
//! ever being broadcast.

use crate::command;
use crate::config::PING_INTERVAL_MS;
use crate::lease;
use crate::model::{now_ms, ClientId, ClientRecord, DEFAULT_ROBOT_ID};
use crate::protocol::{ClientInbound, RobotProjection, ToOperator};
use crate::registry::{outbound_channel, RelayState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn operator_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_operator_ws(socket, state))
}

fn new_client_id() -> ClientId {
    let full = Uuid::new_v4().simple().to_string();
    full[..8].to_string()
}

async fn handle_operator_ws(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = outbound_channel();

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

    let client_id = new_client_id();

    let mut snapshot = Vec::new();
    for robot_id in state.robot_ids().await {
        if let Some(projection) = state
            .with_robot(&robot_id, |r| RobotProjection::from_record(&robot_id, r))
            .await
        {
            snapshot.push(projection);
        }
    }

    state
        .insert_client(ClientRecord {
            tx: tx.clone(),
            client_id: client_id.clone(),
            client_name: format!("Client-{client_id}"),
            subscriptions: Default::default(),
            connected_at: now_ms(),
        })
        .await;
    info!(%client_id, "operator connected");

    let _ = tx.try_send(
        ToOperator::Welcome {
            client_id: client_id.clone(),
            robots: snapshot,
        }
        .to_json_string(),
    );

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => continue,
            Err(e) => {
                warn!(error = %e, "operator socket error");
                break;
            }
        };

        match serde_json::from_str::<ClientInbound>(&text) {
            Ok(ClientInbound::Subscribe(payload)) => {
                let robot_id = payload.robot_id.unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                let client_name = payload.client_name;
                state
                    .with_client_mut(&client_id, |c| {
                        c.subscriptions.insert(robot_id.clone());
                        if let Some(name) = client_name {
                            c.client_name = name;
                        }
                    })
                    .await;

                let frame = match state.with_robot(&robot_id, |r| ToOperator::state_for(&robot_id, r)).await {
                    Some(frame) => frame,
                    None => ToOperator::unknown_state(&robot_id),
                };
                state.send_to_client(&client_id, &frame).await;
            }
            Ok(ClientInbound::Unsubscribe(payload)) => {
                let robot_id = payload.robot_id.unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                state
                    .with_client_mut(&client_id, |c| {
                        c.subscriptions.remove(&robot_id);
                    })
                    .await;
            }
            Ok(ClientInbound::Control(frame)) => {
                let robot_id = frame.robot_id.unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                lease::handle_control_action(
                    &state,
                    &robot_id,
                    &client_id,
                    &frame.payload.action,
                    frame.payload.client_name,
                )
                .await;
            }
            Ok(ClientInbound::Command(frame)) => {
                let robot_id = frame.robot_id.unwrap_or_else(|| DEFAULT_ROBOT_ID.to_string());
                command::handle_command(&state, &robot_id, &client_id, &frame.payload).await;
            }
            Ok(ClientInbound::Ping) => {
                state
                    .send_to_client(&client_id, &ToOperator::Pong { timestamp: now_ms() })
                    .await;
            }
            Ok(ClientInbound::Unknown) => {
                debug!("ignoring unrecognised operator frame type");
            }
            Err(e) => {
                warn!(error = %e, "failed to parse operator frame");
            }
        }
    }

    // §4.6 close handling: release any leases this client held before
    // removing the session, so subscribers see `control_released` ahead of
    // (or at worst alongside) the session simply vanishing.
    for robot_id in state.robot_ids_owned_by(&client_id).await {
        lease::release_on_disconnect(&state, &robot_id, &client_id).await;
    }
    state.remove_client(&client_id).await;
    info!(%client_id, "operator disconnected");

    send_task.abort();
}
