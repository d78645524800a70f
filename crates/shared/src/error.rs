//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StreamId;

/// Errors raised by the hub while handling a connection or a frame.
///
/// Each variant maps to a stable wire code carried in `error{code, message}`
/// frames; see [`HubError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("connection idle for more than {idle_secs}s")]
    ConnectionTimeout { idle_secs: u64 },
    #[error("not a member of stream {0}")]
    NotMember(StreamId),
    #[error("already a member of stream {0}")]
    AlreadyMember(StreamId),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid content: {0}")]
    InvalidContent(String),
    #[error("stream {0} not found")]
    RoomNotFound(StreamId),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("identity provider unavailable: {0}")]
    IdentityUnavailable(String),
}

impl HubError {
    pub fn code(&self) -> &'static str {
        match self {
            HubError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            HubError::NotMember(_) => "NOT_MEMBER",
            HubError::AlreadyMember(_) => "ALREADY_MEMBER",
            HubError::Unauthorized(_) => "UNAUTHORIZED",
            HubError::InvalidContent(_) => "INVALID_CONTENT",
            HubError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            HubError::MalformedFrame(_) => "MALFORMED_FRAME",
            HubError::IdentityUnavailable(_) => "IDENTITY_UNAVAILABLE",
        }
    }
}

/// Error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No live connection; the action was not queued.
    #[error("not connected")]
    NotConnected,
    /// The client was closed explicitly.
    #[error("client closed")]
    Closed,
    /// Refused locally; the hub would reject it with `INVALID_CONTENT`.
    #[error("invalid stream id: {0}")]
    InvalidStreamId(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::NotConnected => "NOT_CONNECTED",
            ClientError::Closed => "CLOSED",
            ClientError::InvalidStreamId(_) => "INVALID_STREAM_ID",
            ClientError::Transport(_) => "TRANSPORT",
            ClientError::Encode(_) => "ENCODE",
        }
    }
}

/// RFC7807 Problem Details (application/problem+json)
///
/// Used as the error body of the HTTP surface (refused upgrades, unknown
/// streams) so callers see the same codes the websocket frames carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wire code of the underlying [`HubError`], when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://livehub.dev/problems/{}", slug),
            title: title.to_string(),
            status,
            detail: Some(detail.into()),
            code: None,
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail)
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new("service-unavailable", "Service Unavailable", 503, detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail)
    }

    /// Map a hub error onto the closest HTTP problem.
    pub fn from_hub_error(err: &HubError) -> Self {
        let mut problem = match err {
            HubError::Unauthorized(_) => Self::unauthorized(err.to_string()),
            HubError::RoomNotFound(_) => Self::not_found(err.to_string()),
            HubError::IdentityUnavailable(_) => Self::service_unavailable(err.to_string()),
            _ => Self::bad_request(err.to_string()),
        };
        problem.code = Some(err.code().to_string());
        problem
    }
}
