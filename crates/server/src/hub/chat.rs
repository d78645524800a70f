//! Chat broadcaster: validates, sequences and fans out chat messages.

use std::sync::Arc;

use chrono::Utc;
use livehub_shared::{ChatMessage, HubError, ServerFrame};
use uuid::Uuid;

use super::outbox::PushOutcome;
use super::rooms::RoomRegistry;
use super::sessions::Session;

#[derive(Debug, Clone)]
pub struct ChatPolicy {
    /// Maximum content length, in characters.
    pub max_chars: usize,
    pub allow_anonymous: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            max_chars: 200,
            allow_anonymous: false,
        }
    }
}

pub struct ChatBroadcaster {
    rooms: Arc<RoomRegistry>,
    policy: ChatPolicy,
}

impl ChatBroadcaster {
    pub fn new(rooms: Arc<RoomRegistry>, policy: ChatPolicy) -> Self {
        Self { rooms, policy }
    }

    fn validate(&self, content: &str) -> Result<(), HubError> {
        if content.trim().is_empty() {
            return Err(HubError::InvalidContent("message is empty".to_string()));
        }
        let chars = content.chars().count();
        if chars > self.policy.max_chars {
            return Err(HubError::InvalidContent(format!(
                "message is {} characters, limit is {}",
                chars, self.policy.max_chars
            )));
        }
        Ok(())
    }

    /// Sequence a message and queue it for every current member, sender
    /// included.
    ///
    /// The room lock is held from sequence assignment until the last push, so
    /// each member's queue receives the room's messages in sequence order.
    /// Returns once the frames are queued; delivery happens on each
    /// connection's writer task.
    pub async fn submit(
        &self,
        sender: &Session,
        stream_id: &str,
        content: &str,
    ) -> Result<ChatMessage, HubError> {
        let not_member = || HubError::NotMember(stream_id.to_string());
        let room = self.rooms.room(stream_id).await.ok_or_else(not_member)?;
        let mut state = room.lock().await;
        if !state.is_member(&sender.id) {
            return Err(not_member());
        }
        if sender.user_id().is_none() && !self.policy.allow_anonymous {
            return Err(HubError::Unauthorized(
                "anonymous viewers cannot chat".to_string(),
            ));
        }
        self.validate(content)?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            sender_id: sender.user_id().map(str::to_string),
            username: sender.display_name(),
            content: content.to_string(),
            sequence: state.next_sequence(),
            timestamp: Utc::now(),
        };

        let frame = ServerFrame::ChatMessage(message.clone());
        for (id, outbox) in state.outboxes() {
            if outbox.push(frame.clone()) == PushOutcome::DroppedOldest {
                tracing::warn!("Outbound queue full for connection {}, dropped oldest frame", id);
            }
        }
        tracing::debug!(
            "Chat #{} in stream {} from {} fanned out to {} members",
            message.sequence,
            stream_id,
            sender.id,
            state.viewer_count()
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::outbox::Outbox;
    use livehub_shared::ViewerProfile;
    use tokio::sync::mpsc;

    fn profile(user_id: &str) -> ViewerProfile {
        ViewerProfile {
            user_id: user_id.into(),
            username: user_id.to_uppercase(),
            avatar: None,
            verified: true,
        }
    }

    fn setup(policy: ChatPolicy) -> (Arc<RoomRegistry>, ChatBroadcaster) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let rooms = Arc::new(RoomRegistry::new(tx, None));
        let chat = ChatBroadcaster::new(rooms.clone(), policy);
        (rooms, chat)
    }

    fn sequences(outbox: &Outbox) -> Vec<u64> {
        outbox
            .drain()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerFrame::ChatMessage(msg) => Some(msg.sequence),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn messages_reach_every_member_including_sender() {
        let (rooms, chat) = setup(ChatPolicy::default());
        let a = Session::new(Some(profile("a")), Outbox::new(16));
        let b = Session::new(Some(profile("b")), Outbox::new(16));
        rooms.join("s1", a.id, &a.outbox).await.unwrap();
        rooms.join("s1", b.id, &b.outbox).await.unwrap();

        let msg = chat.submit(&a, "s1", "hi").await.unwrap();
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.username, "A");
        assert_eq!(msg.sender_id.as_deref(), Some("a"));
        assert_eq!(sequences(&a.outbox), vec![1]);
        assert_eq!(sequences(&b.outbox), vec![1]);
    }

    #[tokio::test]
    async fn non_members_are_rejected_without_broadcast() {
        let (rooms, chat) = setup(ChatPolicy::default());
        let member = Session::new(Some(profile("m")), Outbox::new(16));
        let outsider = Session::new(Some(profile("o")), Outbox::new(16));
        rooms.join("s1", member.id, &member.outbox).await.unwrap();

        assert_eq!(
            chat.submit(&outsider, "s1", "hello").await,
            Err(HubError::NotMember("s1".into()))
        );
        assert_eq!(
            chat.submit(&outsider, "unknown", "hello").await,
            Err(HubError::NotMember("unknown".into()))
        );
        assert!(member.outbox.is_empty());

        // the failed attempt did not consume a sequence number
        assert_eq!(chat.submit(&member, "s1", "ok").await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn content_limits_are_enforced() {
        let (rooms, chat) = setup(ChatPolicy::default());
        let a = Session::new(Some(profile("a")), Outbox::new(16));
        rooms.join("s1", a.id, &a.outbox).await.unwrap();

        let long = "x".repeat(201);
        for bad in ["", "   ", long.as_str()] {
            let err = chat.submit(&a, "s1", bad).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_CONTENT");
        }
        // the limit counts characters, not bytes
        assert!(chat.submit(&a, "s1", &"é".repeat(200)).await.is_ok());
    }

    #[tokio::test]
    async fn anonymous_chat_follows_policy() {
        let (rooms, chat) = setup(ChatPolicy::default());
        let anon = Session::new(None, Outbox::new(16));
        rooms.join("s1", anon.id, &anon.outbox).await.unwrap();
        assert_eq!(
            chat.submit(&anon, "s1", "hi").await.unwrap_err().code(),
            "UNAUTHORIZED"
        );

        let (rooms, chat) = setup(ChatPolicy {
            allow_anonymous: true,
            ..ChatPolicy::default()
        });
        rooms.join("s1", anon.id, &anon.outbox).await.unwrap();
        let msg = chat.submit(&anon, "s1", "hi").await.unwrap();
        assert_eq!(msg.sender_id, None);
        assert!(msg.username.starts_with("viewer-"));
    }

    #[tokio::test]
    async fn concurrent_senders_produce_ordered_gapless_streams() {
        let (rooms, chat) = setup(ChatPolicy::default());
        let chat = Arc::new(chat);
        let watcher = Session::new(Some(profile("w")), Outbox::new(1024));
        rooms.join("s1", watcher.id, &watcher.outbox).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let sender = Arc::new(Session::new(Some(profile(&format!("u{n}"))), Outbox::new(1024)));
            rooms.join("s1", sender.id, &sender.outbox).await.unwrap();
            let chat = chat.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    chat.submit(&sender, "s1", &format!("msg {i}")).await.unwrap();
                }
                sequences(&sender.outbox)
            }));
        }

        for task in tasks {
            let seen = task.await.unwrap();
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
        let all = sequences(&watcher.outbox);
        assert_eq!(all, (1..=200).collect::<Vec<u64>>());
    }
}
