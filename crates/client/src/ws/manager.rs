//! Desired-room bookkeeping.
//!
//! The server forgets everything about a connection once it drops, so the
//! client keeps the set of rooms it wants and replays it on every connect.

use std::collections::BTreeSet;

use livehub_shared::{ClientFrame, StreamId};

#[derive(Debug, Default, Clone)]
pub struct Subscriptions {
    desired: BTreeSet<StreamId>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the room was already wanted.
    pub fn want(&mut self, stream_id: &str) -> bool {
        self.desired.insert(stream_id.to_string())
    }

    /// Returns `false` when the room was not wanted.
    pub fn unwant(&mut self, stream_id: &str) -> bool {
        self.desired.remove(stream_id)
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.desired.contains(stream_id)
    }

    pub fn rooms(&self) -> &BTreeSet<StreamId> {
        &self.desired
    }

    /// One `join_stream` per wanted room, in a stable order.
    pub fn rejoin_frames(&self) -> Vec<ClientFrame> {
        self.desired
            .iter()
            .map(|stream_id| ClientFrame::JoinStream {
                stream_id: stream_id.clone(),
            })
            .collect()
    }
}
