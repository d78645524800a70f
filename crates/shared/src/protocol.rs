//! Wire frames exchanged over the persistent connection.
//!
//! Every frame is a JSON object of the form `{"type": "...", "data": {...}}`.
//! Frame types are snake_case, payload fields are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;
use crate::models::{ChatMessage, FollowEvent, StreamId, UserId};

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    JoinStream { stream_id: StreamId },
    LeaveStream { stream_id: StreamId },
    ChatMessage { stream_id: StreamId, content: String },
    FollowUser { target_id: UserId },
    UnfollowUser { target_id: UserId },
    Ping,
}

impl ClientFrame {
    /// Decode a text frame, mapping any decode failure to `MalformedFrame`.
    ///
    /// Payload-free frames may carry `"data": {}`, so `{"type":"ping","data":{}}`
    /// and `{"type":"ping"}` both decode to [`ClientFrame::Ping`].
    pub fn parse(text: &str) -> Result<Self, HubError> {
        let malformed = |e: serde_json::Error| HubError::MalformedFrame(e.to_string());
        let mut value: Value = serde_json::from_str(text).map_err(malformed)?;
        if let Some(object) = value.as_object_mut() {
            let empty = match object.get("data") {
                Some(Value::Null) => true,
                Some(Value::Object(data)) => data.is_empty(),
                _ => false,
            };
            if empty && object.get("type").and_then(Value::as_str) == Some("ping") {
                object.remove("data");
            }
        }
        serde_json::from_value(value).map_err(malformed)
    }

    /// Frame type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::JoinStream { .. } => "join_stream",
            ClientFrame::LeaveStream { .. } => "leave_stream",
            ClientFrame::ChatMessage { .. } => "chat_message",
            ClientFrame::FollowUser { .. } => "follow_user",
            ClientFrame::UnfollowUser { .. } => "unfollow_user",
            ClientFrame::Ping => "ping",
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    ChatMessage(ChatMessage),
    StreamViewerCount { stream_id: StreamId, count: usize },
    FollowEvent(FollowEvent),
    Pong,
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(err: &HubError) -> Self {
        ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn viewer_count(stream_id: &str, count: usize) -> Self {
        ServerFrame::StreamViewerCount {
            stream_id: stream_id.to_string(),
            count,
        }
    }

    pub fn follow(event: FollowEvent) -> Self {
        ServerFrame::FollowEvent(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FollowAction;
    use serde_json::json;

    #[test]
    fn client_frames_use_snake_case_tags_and_camel_case_fields() {
        let frame = ClientFrame::parse(r#"{"type":"join_stream","data":{"streamId":"s1"}}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::JoinStream {
                stream_id: "s1".into()
            }
        );

        let frame = ClientFrame::parse(
            r#"{"type":"chat_message","data":{"streamId":"s1","content":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind(), "chat_message");

        let frame = ClientFrame::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn ping_accepts_an_empty_payload() {
        for text in [
            r#"{"type":"ping","data":{}}"#,
            r#"{"type":"ping","data":null}"#,
            r#"{"data":{},"type":"ping"}"#,
        ] {
            assert_eq!(ClientFrame::parse(text).unwrap(), ClientFrame::Ping, "{text}");
        }
        let err = ClientFrame::parse(r#"{"type":"ping","data":{"x":1}}"#).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_FRAME");
    }

    #[test]
    fn malformed_frames_are_reported_as_such() {
        for text in [
            "not json",
            r#"{"type":"explode"}"#,
            r#"{"type":"join_stream","data":{}}"#,
            r#"{"data":{"streamId":"s1"}}"#,
        ] {
            let err = ClientFrame::parse(text).unwrap_err();
            assert_eq!(err.code(), "MALFORMED_FRAME", "{text}");
        }
    }

    #[test]
    fn server_frames_encode_expected_shapes() {
        let count = serde_json::to_value(ServerFrame::viewer_count("s1", 3)).unwrap();
        assert_eq!(
            count,
            json!({"type": "stream_viewer_count", "data": {"streamId": "s1", "count": 3}})
        );

        let err = serde_json::to_value(ServerFrame::error(&HubError::NotMember("s1".into()))).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["data"]["code"], "NOT_MEMBER");

        let follow = ServerFrame::follow(FollowEvent::new("a", "b", FollowAction::Unfollow));
        let value = serde_json::to_value(&follow).unwrap();
        assert_eq!(value["data"]["actorId"], "a");
        assert_eq!(value["data"]["action"], "unfollow");
    }
}
