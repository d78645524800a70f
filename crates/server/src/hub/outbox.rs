//! Bounded per-connection outbound queue.
//!
//! Producers (room fan-out, presence, social relay, replies) never wait on a
//! slow consumer: when the queue is full the oldest buffered frame is
//! discarded to make room. Only the owning connection is affected.

use std::collections::VecDeque;
use std::sync::Arc;

use livehub_shared::ServerFrame;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a [`Outbox::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The frame was queued after evicting the oldest buffered frame.
    DroppedOldest,
    /// The connection is gone; the frame was discarded.
    Closed,
}

struct Queue {
    frames: VecDeque<ServerFrame>,
    closed: bool,
    dropped: u64,
}

struct Inner {
    queue: Mutex<Queue>,
    notify: Notify,
    capacity: usize,
}

/// Cloneable handle to one connection's outbound queue.
///
/// Any number of producers may push; exactly one writer task drains it with
/// [`Outbox::recv`].
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<Inner>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Queue {
                    frames: VecDeque::with_capacity(capacity.min(64)),
                    closed: false,
                    dropped: 0,
                }),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    pub fn push(&self, frame: ServerFrame) -> PushOutcome {
        let outcome = {
            let mut queue = self.inner.queue.lock();
            if queue.closed {
                return PushOutcome::Closed;
            }
            let outcome = if queue.frames.len() >= self.inner.capacity {
                queue.frames.pop_front();
                queue.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            queue.frames.push_back(frame);
            outcome
        };
        self.inner.notify.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the outbox is closed and
    /// its farewell frame, if any, has been taken.
    pub async fn recv(&self) -> Option<ServerFrame> {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(frame) = queue.frames.pop_front() {
                    return Some(frame);
                }
                if queue.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Close the outbox and discard anything still buffered.
    pub fn close(&self) {
        self.close_with(None);
    }

    /// Close the outbox, discarding buffered frames but keeping `farewell` as
    /// the last frame the writer sends. A second close changes nothing.
    pub fn close_with(&self, farewell: Option<ServerFrame>) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.closed {
                return;
            }
            queue.closed = true;
            queue.frames.clear();
            queue.frames.extend(farewell);
        }
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.queue.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.queue.lock().dropped
    }

    /// Drain everything currently buffered without waiting.
    pub fn drain(&self) -> Vec<ServerFrame> {
        self.inner.queue.lock().frames.drain(..).collect()
    }
}
