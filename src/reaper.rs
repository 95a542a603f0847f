//! Background sweeps (§4.7): robot staleness and idle control leases.
//!
//! Grounded on `depot/discovery`'s periodic staleness-check task
//! (`tokio::time::interval` driving a sweep over the registry); split into
//! two independent loops here since the spec gives them different periods
//! and triggers.

use crate::config::{IDLE_LEASE_SWEEP_PERIOD, STALENESS_SWEEP_PERIOD};
use crate::lease;
use crate::model::now_ms;
use crate::protocol::{EventPayload, ToOperator};
use crate::registry::RelayState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

pub fn spawn_staleness_reaper(state: Arc<RelayState>, robot_timeout: Duration) {
    tokio::spawn(async move {
        let mut tick = interval(STALENESS_SWEEP_PERIOD);
        loop {
            tick.tick().await;
            sweep_stale_robots(&state, robot_timeout).await;
        }
    });
}

pub fn spawn_idle_lease_reaper(state: Arc<RelayState>, control_idle_timeout: Duration) {
    tokio::spawn(async move {
        let mut tick = interval(IDLE_LEASE_SWEEP_PERIOD);
        loop {
            tick.tick().await;
            lease::sweep_idle_leases(&state, control_idle_timeout).await;
        }
    });
}

async fn sweep_stale_robots(state: &RelayState, robot_timeout: Duration) {
    let now = now_ms();
    for robot_id in state.robot_ids().await {
        let stale = state
            .with_robot(&robot_id, |r| now.saturating_sub(r.last_seen_at) > robot_timeout.as_millis() as u64)
            .await
            .unwrap_or(false);
        if !stale {
            continue;
        }
        let generation = state.with_robot(&robot_id, |r| r.generation).await;
        let Some(generation) = generation else { continue };
        if state.remove_robot_if(&robot_id, generation).await {
            info!(%robot_id, "robot timed out, reaping");
            state
                .broadcast_to_all(&ToOperator::Event {
                    payload: EventPayload::RobotOffline {
                        robot_id: robot_id.clone(),
                        reason: "timeout",
                    },
                })
                .await;
        }
    }
}
