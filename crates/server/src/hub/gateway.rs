//! Connection gateway: authenticates connections, tracks liveness and routes
//! inbound frames to the room registry, chat broadcaster and social relay.
//!
//! The gateway never touches room state directly; every membership or chat
//! mutation goes through the registry and broadcaster APIs.

use std::sync::Arc;
use std::time::Duration;

use livehub_shared::{
    validate_stream_id, ClientFrame, ConnectionId, FollowAction, HubError, ServerFrame,
    ViewerProfile,
};
use tokio::time::Instant;

use super::chat::ChatBroadcaster;
use super::outbox::Outbox;
use super::rooms::RoomRegistry;
use super::sessions::{Session, SessionDirectory};
use super::social::SocialRelay;
use crate::identity::IdentityProvider;

/// What a client presented when connecting. No token means an anonymous,
/// view-only connection.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
}

/// An accepted connection, handed to the transport.
pub struct Connection {
    pub id: ConnectionId,
    pub profile: Option<ViewerProfile>,
    /// Drained by the transport's writer task.
    pub outbox: Outbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// The connection was dropped by the abuse guard.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    TransportError,
    Timeout,
    Abuse,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub heartbeat_timeout: Duration,
    /// Malformed frames tolerated within `frame_violation_window`.
    pub max_frame_violations: u32,
    pub frame_violation_window: Duration,
    pub outbound_capacity: usize,
}

pub struct Gateway {
    settings: GatewaySettings,
    identity: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionDirectory>,
    rooms: Arc<RoomRegistry>,
    chat: ChatBroadcaster,
    social: SocialRelay,
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        identity: Arc<dyn IdentityProvider>,
        sessions: Arc<SessionDirectory>,
        rooms: Arc<RoomRegistry>,
        chat: ChatBroadcaster,
        social: SocialRelay,
    ) -> Self {
        Self {
            settings,
            identity,
            sessions,
            rooms,
            chat,
            social,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Resolve credentials to a profile; `None` means anonymous.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Option<ViewerProfile>, HubError> {
        let token = credentials
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        match token {
            None => Ok(None),
            Some(token) => self.identity.lookup(token).await.map(Some),
        }
    }

    /// Register a session for an already authenticated identity.
    pub async fn open(&self, profile: Option<ViewerProfile>) -> Connection {
        let outbox = Outbox::new(self.settings.outbound_capacity);
        let session = Arc::new(Session::new(profile, outbox.clone()));
        let connection = Connection {
            id: session.id,
            profile: session.profile.clone(),
            outbox,
        };
        tracing::info!(
            "Connection {} opened for {}",
            session.id,
            session.user_id().unwrap_or("anonymous viewer")
        );
        self.sessions.insert(session).await;
        connection
    }

    pub async fn connect(&self, credentials: &Credentials) -> Result<Connection, HubError> {
        let profile = self.authenticate(credentials).await?;
        Ok(self.open(profile).await)
    }

    /// Tear a connection down: cancel its pending sends and leave every room
    /// it joined. Idempotent; returns `true` only for the call that did the
    /// cleanup. A timed-out connection is told why before its socket closes.
    pub async fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let farewell = match reason {
            DisconnectReason::Timeout => Some(HubError::ConnectionTimeout {
                idle_secs: self.settings.heartbeat_timeout.as_secs(),
            }),
            _ => None,
        };
        self.close_session(id, reason, farewell).await
    }

    async fn close_session(
        &self,
        id: ConnectionId,
        reason: DisconnectReason,
        farewell: Option<HubError>,
    ) -> bool {
        let Some(session) = self.sessions.remove(id).await else {
            return false;
        };
        session.outbox.close_with(farewell.as_ref().map(ServerFrame::error));

        let joined: Vec<String> = {
            let mut rooms = session.rooms().await;
            rooms.closed = true;
            rooms.joined.drain().collect()
        };
        for stream_id in &joined {
            if let Err(e) = self.rooms.leave(stream_id, id).await {
                tracing::warn!("Connection {} was not in stream {} at disconnect: {}", id, stream_id, e);
            }
        }

        if let Some(err) = &farewell {
            tracing::warn!("Dropping connection {} ({:?}): {}", id, reason, err);
        }
        tracing::info!(
            "Connection {} closed ({:?}), left {} stream(s)",
            id,
            reason,
            joined.len()
        );
        true
    }

    pub async fn disconnect_all(&self, reason: DisconnectReason) -> usize {
        let mut closed = 0;
        for session in self.sessions.all().await {
            if self.disconnect(session.id, reason).await {
                closed += 1;
            }
        }
        closed
    }

    /// Record transport-level activity (pings, pongs) that carries no frame.
    pub async fn touch(&self, id: ConnectionId) {
        if let Some(session) = self.sessions.get(id).await {
            session.touch();
        }
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> FrameOutcome {
        let Some(session) = self.sessions.get(id).await else {
            return FrameOutcome::Terminate;
        };
        session.touch();

        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => return self.violation(&session, err).await,
        };
        tracing::debug!("Connection {} sent {}", id, frame.kind());

        match self.dispatch(&session, frame).await {
            Ok(Some(reply)) => {
                session.outbox.push(reply);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!("Rejected frame from {}: {}", id, err);
                session.outbox.push(ServerFrame::error(&err));
            }
        }
        FrameOutcome::Continue
    }

    /// Count a frame the transport could not even decode (e.g. binary).
    pub async fn reject_frame(&self, id: ConnectionId, err: HubError) -> FrameOutcome {
        match self.sessions.get(id).await {
            Some(session) => {
                session.touch();
                self.violation(&session, err).await
            }
            None => FrameOutcome::Terminate,
        }
    }

    async fn violation(&self, session: &Session, err: HubError) -> FrameOutcome {
        let count = session.record_violation(Instant::now(), self.settings.frame_violation_window);
        tracing::warn!(
            "Malformed frame from {} ({}/{} within {:?}): {}",
            session.id,
            count,
            self.settings.max_frame_violations,
            self.settings.frame_violation_window,
            err
        );
        if count >= self.settings.max_frame_violations {
            // The last error reply goes out as the farewell frame.
            self.close_session(session.id, DisconnectReason::Abuse, Some(err))
                .await;
            return FrameOutcome::Terminate;
        }
        session.outbox.push(ServerFrame::error(&err));
        FrameOutcome::Continue
    }

    async fn dispatch(&self, session: &Session, frame: ClientFrame) -> Result<Option<ServerFrame>, HubError> {
        match frame {
            ClientFrame::JoinStream { stream_id } => {
                self.join_stream(session, &stream_id).await?;
                Ok(None)
            }
            ClientFrame::LeaveStream { stream_id } => {
                self.leave_stream(session, &stream_id).await?;
                Ok(None)
            }
            ClientFrame::ChatMessage { stream_id, content } => {
                self.chat.submit(session, &stream_id, &content).await?;
                Ok(None)
            }
            ClientFrame::FollowUser { target_id } => {
                self.follow(session, &target_id, FollowAction::Follow).await?;
                Ok(None)
            }
            ClientFrame::UnfollowUser { target_id } => {
                self.follow(session, &target_id, FollowAction::Unfollow).await?;
                Ok(None)
            }
            ClientFrame::Ping => Ok(Some(ServerFrame::Pong)),
        }
    }

    async fn join_stream(&self, session: &Session, stream_id: &str) -> Result<(), HubError> {
        validate_stream_id(stream_id)?;
        let mut rooms = session.rooms().await;
        if rooms.closed {
            return Ok(());
        }
        if rooms.joined.contains(stream_id) {
            return Err(HubError::AlreadyMember(stream_id.to_string()));
        }
        self.rooms.join(stream_id, session.id, &session.outbox).await?;
        rooms.joined.insert(stream_id.to_string());
        Ok(())
    }

    async fn leave_stream(&self, session: &Session, stream_id: &str) -> Result<(), HubError> {
        let mut rooms = session.rooms().await;
        if !rooms.joined.remove(stream_id) {
            return Err(HubError::NotMember(stream_id.to_string()));
        }
        self.rooms.leave(stream_id, session.id).await
    }

    async fn follow(&self, session: &Session, target_id: &str, action: FollowAction) -> Result<(), HubError> {
        let actor_id = session
            .user_id()
            .ok_or_else(|| HubError::Unauthorized(format!("anonymous viewers cannot {}", action)))?;
        if actor_id == target_id {
            return Err(HubError::InvalidContent(format!("cannot {} yourself", action)));
        }
        self.social.relay(actor_id, target_id, action).await;
        Ok(())
    }

    /// Disconnect every session idle for at least the heartbeat timeout.
    pub async fn sweep_idle(&self) -> Vec<ConnectionId> {
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .sessions
            .all()
            .await
            .into_iter()
            .filter(|s| s.idle_for(now) >= self.settings.heartbeat_timeout)
            .map(|s| s.id)
            .collect();
        for id in &stale {
            self.disconnect(*id, DisconnectReason::Timeout).await;
        }
        stale
    }
}
