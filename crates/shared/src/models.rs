//! Shared data model for the livehub server and client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HubError;

/// Identifier of a live stream (the room key).
pub type StreamId = String;

/// Longest stream id, in bytes, the hub accepts.
pub const MAX_STREAM_ID_LEN: usize = 128;

/// A stream id must be 1-128 bytes and not blank.
pub fn validate_stream_id(stream_id: &str) -> Result<(), HubError> {
    if stream_id.trim().is_empty() || stream_id.len() > MAX_STREAM_ID_LEN {
        return Err(HubError::InvalidContent(format!(
            "stream id must be 1-{} bytes",
            MAX_STREAM_ID_LEN
        )));
    }
    Ok(())
}

/// Identifier of a registered user, as issued by the identity provider.
pub type UserId = String;

// --- Connections ---

/// Identifier of one live connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used for anonymous display names and log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Identity ---

/// Profile returned by the external identity provider.
///
/// Looked up once when a connection authenticates and cached for the
/// lifetime of that connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerProfile {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

// --- Chat ---

/// A chat message after it has been sequenced by its room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub stream_id: StreamId,
    /// `None` for anonymous viewers (only when anonymous chat is enabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub username: String,
    pub content: String,
    /// Per-room sequence number, starting at 1 with no gaps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

// --- Social ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FollowAction {
    Follow,
    Unfollow,
}

impl fmt::Display for FollowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowAction::Follow => f.write_str("follow"),
            FollowAction::Unfollow => f.write_str("unfollow"),
        }
    }
}

/// Transient follow/unfollow notification. Delivered at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    pub actor_id: UserId,
    pub target_id: UserId,
    pub action: FollowAction,
    pub timestamp: DateTime<Utc>,
}

impl FollowEvent {
    pub fn new(actor_id: impl Into<UserId>, target_id: impl Into<UserId>, action: FollowAction) -> Self {
        Self {
            actor_id: actor_id.into(),
            target_id: target_id.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

// --- Stream info ---

/// Body of `GET /api/streams/{stream_id}/viewers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerCount {
    pub stream_id: StreamId,
    pub count: usize,
}
