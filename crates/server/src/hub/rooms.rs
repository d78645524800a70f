//! Room registry: per-stream membership, the source of truth for who is
//! watching what.
//!
//! Each room's state sits behind its own mutex, so rooms proceed in parallel
//! while everything touching one room (membership, sequence counter, fan-out)
//! is serialized. Membership changes are reported to the presence aggregator
//! over an unbounded channel and never wait for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livehub_shared::{ConnectionId, HubError, StreamId};
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;

use super::outbox::Outbox;

/// Notification sent to the presence aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined {
        stream_id: StreamId,
        connection_id: ConnectionId,
    },
    Left {
        stream_id: StreamId,
        connection_id: ConnectionId,
    },
    /// The empty room was removed by the reap timer.
    Reaped { stream_id: StreamId },
}

impl MembershipChange {
    pub fn stream_id(&self) -> &str {
        match self {
            MembershipChange::Joined { stream_id, .. }
            | MembershipChange::Left { stream_id, .. }
            | MembershipChange::Reaped { stream_id } => stream_id,
        }
    }
}

/// Mutable state of one room. Only reachable through [`Room::lock`].
pub struct RoomState {
    /// Members and the outbox each one is delivered through.
    pub(crate) members: HashMap<ConnectionId, Outbox>,
    last_sequence: u64,
    reaper: Option<JoinHandle<()>>,
    /// Set when the room has been reaped; a holder of a stale `Arc<Room>`
    /// must look the room up again.
    retired: bool,
}

impl RoomState {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            last_sequence: 0,
            reaper: None,
            retired: false,
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Next chat sequence number: 1, 2, 3, ... with no gaps.
    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    pub(crate) fn outboxes(&self) -> impl Iterator<Item = (&ConnectionId, &Outbox)> {
        self.members.iter()
    }
}

pub struct Room {
    pub stream_id: StreamId,
    pub created_at: DateTime<Utc>,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            created_at: Utc::now(),
            state: Mutex::new(RoomState::new()),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }
}

type RoomMap = Arc<RwLock<HashMap<StreamId, Arc<Room>>>>;

pub struct RoomRegistry {
    rooms: RoomMap,
    changes: mpsc::UnboundedSender<MembershipChange>,
    /// `None` keeps empty rooms forever.
    reap_after: Option<Duration>,
}

impl RoomRegistry {
    pub fn new(changes: mpsc::UnboundedSender<MembershipChange>, reap_after: Option<Duration>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            changes,
            reap_after,
        }
    }

    /// Get or create the room for a stream.
    async fn room_or_create(&self, stream_id: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(stream_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(stream_id) {
            return room.clone();
        }

        tracing::debug!("Creating room for stream {}", stream_id);
        let room = Arc::new(Room::new(stream_id.to_string()));
        rooms.insert(stream_id.to_string(), room.clone());
        room
    }

    pub(crate) async fn room(&self, stream_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(stream_id).cloned()
    }

    /// Add a connection to a stream's room, creating the room if absent.
    pub async fn join(
        &self,
        stream_id: &str,
        connection_id: ConnectionId,
        outbox: &Outbox,
    ) -> Result<(), HubError> {
        loop {
            let room = self.room_or_create(stream_id).await;
            let mut state = room.lock().await;
            if state.retired {
                continue;
            }
            if state.is_member(&connection_id) {
                return Err(HubError::AlreadyMember(stream_id.to_string()));
            }
            if let Some(reaper) = state.reaper.take() {
                reaper.abort();
            }
            state.members.insert(connection_id, outbox.clone());
            tracing::debug!(
                "Connection {} joined stream {} ({} members)",
                connection_id,
                stream_id,
                state.viewer_count()
            );
            self.notify(MembershipChange::Joined {
                stream_id: stream_id.to_string(),
                connection_id,
            });
            return Ok(());
        }
    }

    pub async fn leave(&self, stream_id: &str, connection_id: ConnectionId) -> Result<(), HubError> {
        let Some(room) = self.room(stream_id).await else {
            return Err(HubError::NotMember(stream_id.to_string()));
        };
        let mut state = room.lock().await;
        if state.members.remove(&connection_id).is_none() {
            return Err(HubError::NotMember(stream_id.to_string()));
        }
        tracing::debug!(
            "Connection {} left stream {} ({} members)",
            connection_id,
            stream_id,
            state.viewer_count()
        );
        self.notify(MembershipChange::Left {
            stream_id: stream_id.to_string(),
            connection_id,
        });

        if state.members.is_empty() {
            if let Some(delay) = self.reap_after {
                state.reaper = Some(self.schedule_reap(room.clone(), delay));
            }
        }
        Ok(())
    }

    pub async fn members_of(&self, stream_id: &str) -> Result<HashSet<ConnectionId>, HubError> {
        let room = self
            .room(stream_id)
            .await
            .ok_or_else(|| HubError::RoomNotFound(stream_id.to_string()))?;
        let state = room.lock().await;
        Ok(state.members.keys().copied().collect())
    }

    /// Live viewer count, always computed from the member set.
    pub async fn viewer_count(&self, stream_id: &str) -> Result<usize, HubError> {
        let room = self
            .room(stream_id)
            .await
            .ok_or_else(|| HubError::RoomNotFound(stream_id.to_string()))?;
        let count = room.lock().await.viewer_count();
        Ok(count)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    fn notify(&self, change: MembershipChange) {
        if self.changes.send(change).is_err() {
            tracing::debug!("Presence aggregator is gone, dropping membership change");
        }
    }

    fn schedule_reap(&self, room: Arc<Room>, delay: Duration) -> JoinHandle<()> {
        let rooms = self.rooms.clone();
        let changes = self.changes.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut map = rooms.write().await;
            let Some(current) = map.get(&room.stream_id) else {
                return;
            };
            if !Arc::ptr_eq(current, &room) {
                return;
            }
            let mut state = room.lock().await;
            if !state.members.is_empty() {
                return;
            }
            state.retired = true;
            state.reaper = None;
            map.remove(&room.stream_id);
            tracing::debug!("Reaped empty room for stream {}", room.stream_id);
            let _ = changes.send(MembershipChange::Reaped {
                stream_id: room.stream_id.clone(),
            });
        })
    }
}
