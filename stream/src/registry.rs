//! Connection registry: device rooms, throttling, and fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::Outbound;

/// Default minimum spacing between processed frames per device.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(400);

/// Handle for one streaming connection inside a room.
///
/// Holds the outbound sender behind an `Arc` so the registry can
/// identify exactly this connection by pointer during cleanup, even
/// if the same device reconnects.
#[derive(Clone)]
pub struct RegistryHandle {
    device_id: Arc<str>,
    tx: Arc<mpsc::Sender<Outbound>>,
}

impl RegistryHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Send to just this connection. A failed send means the
    /// connection is going away; the caller's disconnect path will
    /// clean it up.
    pub async fn reply(&self, msg: Outbound) {
        if self.tx.send(msg).await.is_err() {
            debug!(device_id = %self.device_id, "reply to closed connection dropped");
        }
    }
}

struct Room {
    connections: Vec<Arc<mpsc::Sender<Outbound>>>,
}

/// Groups streaming connections into rooms keyed by device id and
/// fans results out to every connection in a room.
///
/// Room membership is mutated concurrently by connect, disconnect and
/// broadcast; every mutation happens under the rooms lock so it is
/// atomic with respect to the snapshot a broadcast iterates.
pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    /// Per-device frame clock backing the throttle.
    throttle: Mutex<HashMap<String, Instant>>,
    frame_interval: Duration,
}

impl ConnectionRegistry {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            throttle: Mutex::new(HashMap::new()),
            frame_interval,
        }
    }

    /// Add a connection to its device room, creating the room on
    /// first join.
    pub fn join(&self, device_id: &str, tx: mpsc::Sender<Outbound>) -> RegistryHandle {
        let tx = Arc::new(tx);
        let mut rooms = self.rooms.write();
        rooms
            .entry(device_id.to_string())
            .or_insert_with(|| Room {
                connections: Vec::new(),
            })
            .connections
            .push(tx.clone());
        debug!(device_id, "connection joined room");
        RegistryHandle {
            device_id: Arc::from(device_id),
            tx,
        }
    }

    /// Remove a connection from its room; an emptied room is deleted.
    ///
    /// Pointer comparison makes this remove exactly the handle's
    /// connection and never a newer one that joined under the same
    /// device id.
    pub fn leave(&self, handle: &RegistryHandle) {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get_mut(handle.device_id()) {
            room.connections.retain(|tx| !Arc::ptr_eq(tx, &handle.tx));
            if room.connections.is_empty() {
                rooms.remove(handle.device_id());
                self.throttle.lock().remove(handle.device_id());
                debug!(device_id = %handle.device_id, "room emptied and deleted");
            }
        }
    }

    /// Whether a frame for this device should be processed now.
    ///
    /// Check-and-update is atomic: the first caller inside a window
    /// claims it, everyone else inside `frame_interval` is throttled.
    /// Callers pass the id of a joined room; the clock entry is then
    /// guaranteed to be removed when that room empties.
    pub fn try_begin_frame(&self, device_id: &str) -> bool {
        let mut throttle = self.throttle.lock();
        let now = Instant::now();
        match throttle.get(device_id) {
            Some(&last) if now.duration_since(last) < self.frame_interval => false,
            _ => {
                throttle.insert(device_id.to_string(), now);
                true
            }
        }
    }

    /// Best-effort fan-out to every connection in the device's room.
    ///
    /// A send failure removes that connection without aborting
    /// delivery to the rest.
    pub async fn broadcast(&self, device_id: &str, msg: Outbound) {
        let targets: Vec<Arc<mpsc::Sender<Outbound>>> = {
            let rooms = self.rooms.read();
            match rooms.get(device_id) {
                Some(room) => room.connections.clone(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for tx in targets {
            if tx.send(msg.clone()).await.is_err() {
                warn!(device_id, "dropping broken connection from room");
                dead.push(tx);
            }
        }

        if !dead.is_empty() {
            let mut rooms = self.rooms.write();
            if let Some(room) = rooms.get_mut(device_id) {
                room.connections
                    .retain(|tx| !dead.iter().any(|d| Arc::ptr_eq(tx, d)));
                if room.connections.is_empty() {
                    rooms.remove(device_id);
                    self.throttle.lock().remove(device_id);
                }
            }
        }
    }

    /// Number of connections in a device's room.
    pub fn room_len(&self, device_id: &str) -> usize {
        self.rooms
            .read()
            .get(device_id)
            .map(|r| r.connections.len())
            .unwrap_or(0)
    }

    /// Number of live rooms.
    pub fn device_count(&self) -> usize {
        self.rooms.read().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}
