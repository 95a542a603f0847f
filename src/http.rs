//! The small HTTP surface (§6): service status, health, and robot
//! projections. Grounded on `depot/discovery`'s `/health` and rover-list
//! handlers, generalised to the relay's two registries.

use crate::error::ApiError;
use crate::model::now_ms;
use crate::protocol::{RobotProjection, RobotSummary};
use crate::registry::RelayState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    service: &'static str,
    robots: Vec<RobotSummary>,
    ui_clients: usize,
    timestamp: u64,
}

pub async fn status(State(state): State<Arc<RelayState>>) -> Json<StatusResponse> {
    let mut robots = Vec::new();
    for robot_id in state.robot_ids().await {
        if let Some(summary) = state.with_robot(&robot_id, |r| RobotSummary::from_record(&robot_id, r)).await {
            robots.push(summary);
        }
    }
    Json(StatusResponse {
        status: "ok",
        service: "relay",
        robots,
        ui_clients: state.client_count().await,
        timestamp: now_ms(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Serialize)]
struct RobotsResponse {
    robots: Vec<RobotProjection>,
    timestamp: u64,
}

pub async fn list_robots(State(state): State<Arc<RelayState>>) -> Json<RobotsResponse> {
    let mut robots = Vec::new();
    for robot_id in state.robot_ids().await {
        if let Some(projection) = state
            .with_robot(&robot_id, |r| RobotProjection::from_record(&robot_id, r))
            .await
        {
            robots.push(projection);
        }
    }
    Json(RobotsResponse {
        robots,
        timestamp: now_ms(),
    })
}

pub async fn get_robot(
    State(state): State<Arc<RelayState>>,
    Path(robot_id): Path<String>,
) -> Result<Json<RobotProjection>, ApiError> {
    state
        .with_robot(&robot_id, |r| RobotProjection::from_record(&robot_id, r))
        .await
        .map(Json)
        .ok_or(ApiError::RobotNotFound)
}
