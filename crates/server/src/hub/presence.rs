//! Presence aggregator: turns membership churn into debounced
//! `stream_viewer_count` frames.
//!
//! The first change to a room opens a settling window. When the window
//! closes the count is read from the live member set (never from a cached
//! counter) and broadcast to the room if it differs from the last emitted
//! value. Members that joined during a window whose count ended up unchanged
//! get the current count on their own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use livehub_shared::{ConnectionId, ServerFrame, StreamId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::outbox::PushOutcome;
use super::rooms::{MembershipChange, RoomRegistry};

#[derive(Debug, Default)]
struct PresenceSlot {
    last_emitted: Option<usize>,
    deadline: Option<Instant>,
    newcomers: HashSet<ConnectionId>,
}

pub struct PresenceAggregator {
    registry: Arc<RoomRegistry>,
    changes: mpsc::UnboundedReceiver<MembershipChange>,
    debounce: Duration,
    slots: HashMap<StreamId, PresenceSlot>,
}

impl PresenceAggregator {
    pub fn new(
        registry: Arc<RoomRegistry>,
        changes: mpsc::UnboundedReceiver<MembershipChange>,
        debounce: Duration,
    ) -> Self {
        Self {
            registry,
            changes,
            debounce,
            slots: HashMap::new(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!("Presence aggregator started (debounce {:?})", self.debounce);
        loop {
            let next_deadline = self.next_deadline();
            let window_closed = async move {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                change = self.changes.recv() => match change {
                    Some(change) => self.on_membership_changed(change),
                    None => break,
                },
                _ = window_closed => self.flush_due(Instant::now()).await,
            }
        }
        tracing::debug!("Presence aggregator stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().filter_map(|slot| slot.deadline).min()
    }

    /// Record a membership change and open a settling window if none is open.
    fn on_membership_changed(&mut self, change: MembershipChange) {
        let stream_id = change.stream_id().to_string();
        if let MembershipChange::Reaped { .. } = change {
            self.slots.remove(&stream_id);
            return;
        }

        let slot = self.slots.entry(stream_id).or_default();
        match change {
            MembershipChange::Joined { connection_id, .. } => {
                slot.newcomers.insert(connection_id);
            }
            MembershipChange::Left { connection_id, .. } => {
                slot.newcomers.remove(&connection_id);
            }
            MembershipChange::Reaped { .. } => {}
        }
        if slot.deadline.is_none() {
            slot.deadline = Some(Instant::now() + self.debounce);
        }
    }

    async fn flush_due(&mut self, now: Instant) {
        let due: Vec<StreamId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for stream_id in due {
            self.emit(&stream_id).await;
        }
    }

    async fn emit(&mut self, stream_id: &str) {
        let Some(room) = self.registry.room(stream_id).await else {
            self.slots.remove(stream_id);
            return;
        };
        let Some(slot) = self.slots.get_mut(stream_id) else {
            return;
        };
        slot.deadline = None;
        let newcomers = std::mem::take(&mut slot.newcomers);

        // Hold the room lock while pushing so the emitted count is the member
        // set size at emission time.
        let state = room.lock().await;
        let count = state.viewer_count();
        let frame = ServerFrame::viewer_count(stream_id, count);

        let recipients: Vec<_> = if slot.last_emitted != Some(count) {
            slot.last_emitted = Some(count);
            state.outboxes().collect()
        } else {
            state
                .outboxes()
                .filter(|(id, _)| newcomers.contains(*id))
                .collect()
        };

        tracing::debug!(
            "Emitting viewer count {} for stream {} to {} members",
            count,
            stream_id,
            recipients.len()
        );
        for (id, outbox) in recipients {
            if outbox.push(frame.clone()) == PushOutcome::DroppedOldest {
                tracing::warn!("Outbound queue full for connection {}, dropped oldest frame", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::outbox::Outbox;

    const WINDOW: Duration = Duration::from_millis(500);

    fn start() -> Arc<RoomRegistry> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(RoomRegistry::new(tx, None));
        PresenceAggregator::new(registry.clone(), rx, WINDOW).spawn();
        registry
    }

    fn counts(outbox: &Outbox) -> Vec<usize> {
        outbox
            .drain()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerFrame::StreamViewerCount { count, .. } => Some(count),
                _ => None,
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(WINDOW * 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_joins_emits_once() {
        let registry = start();
        let outboxes: Vec<(ConnectionId, Outbox)> =
            (0..50).map(|_| (ConnectionId::new(), Outbox::new(64))).collect();
        for (id, outbox) in &outboxes {
            registry.join("s1", *id, outbox).await.unwrap();
        }
        settle().await;

        for (_, outbox) in &outboxes {
            assert_eq!(counts(outbox), vec![50]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_emit_each_change() {
        let registry = start();
        let (a, a_out) = (ConnectionId::new(), Outbox::new(16));
        let (b, b_out) = (ConnectionId::new(), Outbox::new(16));

        registry.join("s1", a, &a_out).await.unwrap();
        settle().await;
        registry.join("s1", b, &b_out).await.unwrap();
        settle().await;
        registry.leave("s1", a).await.unwrap();
        settle().await;

        assert_eq!(counts(&a_out), vec![1, 2]);
        assert_eq!(counts(&b_out), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn churn_that_nets_out_only_informs_newcomers() {
        let registry = start();
        let (a, a_out) = (ConnectionId::new(), Outbox::new(16));
        let (b, b_out) = (ConnectionId::new(), Outbox::new(16));
        let (c, c_out) = (ConnectionId::new(), Outbox::new(16));

        registry.join("s1", a, &a_out).await.unwrap();
        registry.join("s1", b, &b_out).await.unwrap();
        settle().await;
        assert_eq!(counts(&a_out), vec![2]);
        assert_eq!(counts(&b_out), vec![2]);

        // b leaves and c joins within one window: count stays 2
        registry.leave("s1", b).await.unwrap();
        registry.join("s1", c, &c_out).await.unwrap();
        settle().await;

        assert!(counts(&a_out).is_empty());
        assert!(counts(&b_out).is_empty());
        assert_eq!(counts(&c_out), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_emission_matches_live_size() {
        let registry = start();
        let watcher = (ConnectionId::new(), Outbox::new(256));
        registry.join("s1", watcher.0, &watcher.1).await.unwrap();

        let ids: Vec<ConnectionId> = (0..20).map(|_| ConnectionId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            registry.join("s1", *id, &Outbox::new(8)).await.unwrap();
            if i % 3 == 0 {
                registry.leave("s1", *id).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(130)).await;
        }
        settle().await;

        let live = registry.viewer_count("s1").await.unwrap();
        assert_eq!(counts(&watcher.1).last().copied(), Some(live));
    }
}
