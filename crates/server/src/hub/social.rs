//! Best-effort relay of follow/unfollow events to a user's live connections.

use std::sync::Arc;

use livehub_shared::{FollowAction, FollowEvent, ServerFrame};

use super::outbox::PushOutcome;
use super::sessions::SessionDirectory;

pub struct SocialRelay {
    sessions: Arc<SessionDirectory>,
}

impl SocialRelay {
    pub fn new(sessions: Arc<SessionDirectory>) -> Self {
        Self { sessions }
    }

    /// Push a `follow_event` to every live connection of `target_id`.
    ///
    /// Returns how many connections the event was queued on. An offline
    /// target is not an error: durable notifications are somebody else's job.
    pub async fn relay(&self, actor_id: &str, target_id: &str, action: FollowAction) -> usize {
        let targets = self.sessions.for_user(target_id).await;
        if targets.is_empty() {
            tracing::debug!("{} target {} is offline, not relayed", action, target_id);
            return 0;
        }

        let frame = ServerFrame::follow(FollowEvent::new(actor_id, target_id, action));
        let mut delivered = 0;
        for session in targets {
            match session.outbox.push(frame.clone()) {
                PushOutcome::Queued => delivered += 1,
                PushOutcome::DroppedOldest => {
                    tracing::warn!(
                        "Outbound queue full for connection {}, dropped oldest frame",
                        session.id
                    );
                    delivered += 1;
                }
                PushOutcome::Closed => {}
            }
        }
        tracing::debug!(
            "Relayed {} from {} to {} connection(s) of {}",
            action,
            actor_id,
            delivered,
            target_id
        );
        delivered
    }
}
