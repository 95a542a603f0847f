//! Shared relay state: the robot registry and the operator client set.
//!
//! Grounded on `depot/dispatch`'s `AppState` (`RwLock<HashMap<..>>` plus a
//! `broadcast::Sender` wrapped in `Arc`) generalised to two registries (robots
//! and clients) because, unlike the teacher's rover map, operators here are
//! also individually addressable (subscriptions, control ownership) rather
//! than pure broadcast fan-out subscribers.

use crate::model::{
    now_ms, ClientId, ClientRecord, OutboundTx, RobotId, RobotRecord, OUTBOUND_QUEUE_CAPACITY,
};
use crate::protocol::ToOperator;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio::task::AbortHandle;
use tracing::warn;

pub struct RelayState {
    robots: RwLock<HashMap<RobotId, RobotRecord>>,
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            robots: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    // -- robots ---------------------------------------------------------

    /// Insert or replace the `RobotRecord` for `id`. If a prior record
    /// existed for a *different* session, its session task is aborted —
    /// terminating the stale socket outright, not just dropping the
    /// registry's reference to it — before the new record becomes visible
    /// (invariant 1 in §3). A `hello` re-sent by the same session (its abort
    /// handle compares equal) does not abort itself. Returns the bumped
    /// generation for the new record.
    pub async fn upsert_robot(
        &self,
        id: RobotId,
        tx: OutboundTx,
        abort: AbortHandle,
        version: String,
        capabilities: Vec<String>,
    ) -> u64 {
        let mut robots = self.robots.write().await;
        let generation = robots.get(&id).map(|r| r.generation + 1).unwrap_or(0);
        if let Some(prev) = robots.get(&id) {
            if prev.abort != abort {
                prev.abort.abort();
            }
        }
        robots.insert(
            id,
            RobotRecord {
                tx,
                abort,
                generation,
                version,
                capabilities,
                last_seen_at: now_ms(),
                telemetry: Default::default(),
                lease: Default::default(),
            },
        );
        generation
    }

    pub async fn with_robot<R>(&self, id: &str, f: impl FnOnce(&RobotRecord) -> R) -> Option<R> {
        self.robots.read().await.get(id).map(f)
    }

    pub async fn with_robot_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut RobotRecord) -> R,
    ) -> Option<R> {
        self.robots.write().await.get_mut(id).map(f)
    }

    /// Compare-and-remove: only removes the entry if its generation still
    /// matches, so a reaper racing a reconnect can't evict the fresh
    /// session (§4.1).
    pub async fn remove_robot_if(&self, id: &str, generation: u64) -> bool {
        let mut robots = self.robots.write().await;
        if robots.get(id).map(|r| r.generation) == Some(generation) {
            robots.remove(id);
            true
        } else {
            false
        }
    }

    pub async fn robot_ids(&self) -> Vec<RobotId> {
        self.robots.read().await.keys().cloned().collect()
    }

    pub async fn robot_count(&self) -> usize {
        self.robots.read().await.len()
    }

    // -- clients ----------------------------------------------------------

    pub async fn insert_client(&self, record: ClientRecord) {
        self.clients.write().await.insert(record.client_id.clone(), record);
    }

    pub async fn with_client<R>(&self, id: &str, f: impl FnOnce(&ClientRecord) -> R) -> Option<R> {
        self.clients.read().await.get(id).map(f)
    }

    pub async fn with_client_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ClientRecord) -> R,
    ) -> Option<R> {
        self.clients.write().await.get_mut(id).map(f)
    }

    pub async fn remove_client(&self, id: &str) -> Option<ClientRecord> {
        self.clients.write().await.remove(id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Client ids currently holding the lease on `robot_id`, used to release
    /// it when their session closes (§4.6's close handling walks every
    /// robot whose owner is the disconnecting client, which is the same
    /// relation read the other way around).
    pub async fn robot_ids_owned_by(&self, client_id: &str) -> Vec<RobotId> {
        self.robots
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.lease.is_owned_by(client_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    // -- broadcast --------------------------------------------------------

    /// Deliver to every currently open operator socket. Iterates a
    /// point-in-time snapshot of sender handles so a send that triggers a
    /// close can't reenter the map (§4.5).
    pub async fn broadcast_to_all(&self, msg: &ToOperator) {
        let json = msg.to_json_string();
        let senders: Vec<(ClientId, OutboundTx)> = self
            .clients
            .read()
            .await
            .values()
            .map(|c| (c.client_id.clone(), c.tx.clone()))
            .collect();
        for (client_id, tx) in senders {
            queue_or_drop(&tx, &client_id, &json);
        }
    }

    /// Deliver to every open operator subscribed to `robot_id`.
    pub async fn broadcast_to_subscribers(&self, robot_id: &str, msg: &ToOperator) {
        let json = msg.to_json_string();
        let senders: Vec<(ClientId, OutboundTx)> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.subscriptions.contains(robot_id))
            .map(|c| (c.client_id.clone(), c.tx.clone()))
            .collect();
        for (client_id, tx) in senders {
            queue_or_drop(&tx, &client_id, &json);
        }
    }

    pub async fn send_to_client(&self, client_id: &str, msg: &ToOperator) {
        if let Some(tx) = self.clients.read().await.get(client_id).map(|c| c.tx.clone()) {
            queue_or_drop(&tx, client_id, &msg.to_json_string());
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking enqueue per §4.5/§9C: a full queue means the peer is slow or
/// gone, so the newest frame is dropped and logged rather than stalling the
/// broadcaster or the rest of the fan-out.
fn queue_or_drop(tx: &OutboundTx, recipient: &str, json: &str) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(json.to_string()) {
        warn!(recipient, "outbound queue full, dropping frame");
    }
}

pub fn outbound_channel() -> (OutboundTx, mpsc::Receiver<String>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}
