//! End-to-end scenarios driven over real sockets (S1-S6 in the design doc),
//! exercising the router exactly as `main` assembles it, against a live
//! `tokio-tungstenite` client on an ephemeral port.
//!
//! Run with: cargo test --test e2e

use futures_util::{SinkExt, StreamExt};
use relay::registry::RelayState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    addr: std::net::SocketAddr,
}

async fn spawn_server() -> TestServer {
    let state = Arc::new(RelayState::new());
    let app = relay::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: std::net::SocketAddr, path: &str) -> WsStream {
    let url = format!("ws://{addr}{path}");
    let (stream, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    stream
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Reads frames until one matches `predicate`, skipping pings/others, with a
/// bounded wait so a protocol regression fails the test instead of hanging.
async fn recv_matching(ws: &mut WsStream, predicate: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await.expect("stream ended").expect("ws error") {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if predicate(&value) {
                        return value;
                    }
                }
                Message::Ping(payload) => {
                    ws.send(Message::Pong(payload)).await.unwrap();
                }
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for expected frame")
}

fn is_type(value: &Value, expected: &str) -> bool {
    value.get("type").and_then(Value::as_str) == Some(expected)
}

fn event_kind(value: &Value, expected: &str) -> bool {
    is_type(value, "event") && value["payload"]["kind"].as_str() == Some(expected)
}

#[tokio::test]
async fn s1_registration_and_telemetry_fan_out() {
    let server = spawn_server().await;

    let mut robot = connect(server.addr, "/robot").await;
    send_json(
        &mut robot,
        json!({"type": "hello", "robotId": "fordward", "version": "0.1.0", "capabilities": ["pose"]}),
    )
    .await;
    let welcome = recv_matching(&mut robot, |v| is_type(v, "welcome")).await;
    assert!(welcome["safety"]["maxLinearVelocity"].is_number());

    let mut a = connect(server.addr, "/ui").await;
    recv_matching(&mut a, |v| is_type(v, "welcome")).await;
    send_json(&mut a, json!({"type": "subscribe", "robotId": "fordward", "clientName": "A"})).await;

    let mut b = connect(server.addr, "/ui").await;
    recv_matching(&mut b, |v| is_type(v, "welcome")).await;
    send_json(&mut b, json!({"type": "subscribe", "robotId": "fordward", "clientName": "B"})).await;

    send_json(
        &mut robot,
        json!({
            "type": "telemetry",
            "robotId": "fordward",
            "payload": {"mode": "idle", "battery": {"percent": 80, "voltage": 7.6}},
        }),
    )
    .await;

    for ws in [&mut a, &mut b] {
        let state = recv_matching(ws, |v| is_type(v, "state") && v["mode"] == "idle").await;
        assert_eq!(state["battery"]["percent"], 80.0);
        assert_eq!(state["online"], true);
        assert!(state["control"]["ownerClientId"].is_null());
    }
}

#[tokio::test]
async fn s2_control_arbitration() {
    let server = spawn_server().await;

    let mut robot = connect(server.addr, "/robot").await;
    send_json(&mut robot, json!({"type": "hello", "robotId": "fordward"})).await;
    recv_matching(&mut robot, |v| is_type(v, "welcome")).await;

    // §8 S2 is given "S1 state": both operators have already subscribed.
    let mut a = connect(server.addr, "/ui").await;
    recv_matching(&mut a, |v| is_type(v, "welcome")).await;
    send_json(&mut a, json!({"type": "subscribe", "robotId": "fordward", "clientName": "A"})).await;
    recv_matching(&mut a, |v| is_type(v, "state")).await;

    let mut b = connect(server.addr, "/ui").await;
    recv_matching(&mut b, |v| is_type(v, "welcome")).await;
    send_json(&mut b, json!({"type": "subscribe", "robotId": "fordward", "clientName": "B"})).await;
    recv_matching(&mut b, |v| is_type(v, "state")).await;

    send_json(
        &mut a,
        json!({"type": "control", "robotId": "fordward", "payload": {"action": "request", "clientName": "A"}}),
    )
    .await;
    let acquired = recv_matching(&mut a, |v| event_kind(v, "control_acquired")).await;
    assert_eq!(acquired["payload"]["ownerName"], "A");

    send_json(
        &mut b,
        json!({"type": "control", "robotId": "fordward", "payload": {"action": "request", "clientName": "B"}}),
    )
    .await;
    let denied = recv_matching(&mut b, |v| is_type(v, "error")).await;
    assert_eq!(denied["code"], "CONTROL_DENIED");
    assert_eq!(denied["holder"], "A");
}

#[tokio::test]
async fn s3_authorised_teleop_with_clamping() {
    let server = spawn_server().await;

    let mut robot = connect(server.addr, "/robot").await;
    send_json(&mut robot, json!({"type": "hello", "robotId": "fordward"})).await;
    recv_matching(&mut robot, |v| is_type(v, "welcome")).await;

    // §8 S3 is given "with A holding the lease", via S2's "Given S1 state":
    // A has already subscribed before requesting control.
    let mut a = connect(server.addr, "/ui").await;
    recv_matching(&mut a, |v| is_type(v, "welcome")).await;
    send_json(&mut a, json!({"type": "subscribe", "robotId": "fordward", "clientName": "A"})).await;
    recv_matching(&mut a, |v| is_type(v, "state")).await;

    send_json(
        &mut a,
        json!({"type": "control", "robotId": "fordward", "payload": {"action": "request", "clientName": "A"}}),
    )
    .await;
    recv_matching(&mut a, |v| event_kind(v, "control_acquired")).await;

    send_json(
        &mut a,
        json!({
            "type": "command",
            "robotId": "fordward",
            "payload": {"kind": "teleop", "linear_x": 2.0, "angular_z": -5.0},
        }),
    )
    .await;

    let forwarded = recv_matching(&mut robot, |v| is_type(v, "command")).await;
    assert_eq!(forwarded["command"], "teleop");
    assert_eq!(forwarded["linear_x"], 0.5);
    assert_eq!(forwarded["angular_z"], -1.5);
}

#[tokio::test]
async fn s6_owner_disconnect_releases_lease() {
    let server = spawn_server().await;

    let mut robot = connect(server.addr, "/robot").await;
    send_json(&mut robot, json!({"type": "hello", "robotId": "fordward"})).await;
    recv_matching(&mut robot, |v| is_type(v, "welcome")).await;

    // §8 S6 builds on "A holding the lease" per S2/S3's "Given S1 state":
    // A has already subscribed before requesting control.
    let mut a = connect(server.addr, "/ui").await;
    recv_matching(&mut a, |v| is_type(v, "welcome")).await;
    send_json(&mut a, json!({"type": "subscribe", "robotId": "fordward", "clientName": "A"})).await;
    recv_matching(&mut a, |v| is_type(v, "state")).await;
    send_json(
        &mut a,
        json!({"type": "control", "robotId": "fordward", "payload": {"action": "request", "clientName": "A"}}),
    )
    .await;
    recv_matching(&mut a, |v| event_kind(v, "control_acquired")).await;

    let mut b = connect(server.addr, "/ui").await;
    recv_matching(&mut b, |v| is_type(v, "welcome")).await;
    send_json(&mut b, json!({"type": "subscribe", "robotId": "fordward", "clientName": "B"})).await;
    recv_matching(&mut b, |v| is_type(v, "state")).await;

    a.close(None).await.unwrap();

    let released = recv_matching(&mut b, |v| event_kind(v, "control_released")).await;
    assert_eq!(released["payload"]["reason"], "owner_disconnected");

    send_json(
        &mut b,
        json!({"type": "control", "robotId": "fordward", "payload": {"action": "request", "clientName": "B"}}),
    )
    .await;
    let granted = recv_matching(&mut b, |v| event_kind(v, "control_acquired")).await;
    assert_eq!(granted["payload"]["ownerName"], "B");
}

#[tokio::test]
async fn unknown_robot_control_request_is_offline() {
    let server = spawn_server().await;
    let mut a = connect(server.addr, "/ui").await;
    recv_matching(&mut a, |v| is_type(v, "welcome")).await;

    send_json(
        &mut a,
        json!({"type": "control", "robotId": "ghost", "payload": {"action": "request", "clientName": "A"}}),
    )
    .await;
    let err = recv_matching(&mut a, |v| is_type(v, "error")).await;
    assert_eq!(err["code"], "ROBOT_OFFLINE");
}

#[tokio::test]
async fn http_health_and_status_surface() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let state = Arc::new(RelayState::new());
    let app = relay::router(state);

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(health.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");

    let status = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(status.into_body(), usize::MAX).await.unwrap();
    let status: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["uiClients"], 0);

    let missing = app
        .oneshot(Request::builder().uri("/robots/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), axum::http::StatusCode::NOT_FOUND);
}
