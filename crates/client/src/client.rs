//! `LiveClient`: the consumer-facing handle over a reconnecting hub socket.
//!
//! Events arrive on a typed broadcast channel (`subscribe`), connection state
//! on a watch channel (`watch_state`). The watch channel only keeps the latest
//! state; every transition is also sent as `ClientEvent::StateChanged`.
//! Actions other than join/leave fail fast with `NotConnected` while the
//! socket is down instead of queuing.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::UnboundedSender;
use livehub_shared::{
    validate_stream_id, ChatMessage, ClientError, ClientFrame, FollowEvent, ServerFrame, StreamId,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;

use crate::ws::{run_connection_loop, ClientConfig, ConnectionState, Subscriptions};

const EVENT_CAPACITY: usize = 256;

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A socket was established and wanted rooms were re-joined.
    Connected,
    /// The socket dropped; a reconnect is scheduled.
    Disconnected,
    Chat(ChatMessage),
    ViewerCount { stream_id: StreamId, count: usize },
    Follow(FollowEvent),
    /// An `error` frame from the hub.
    ServerError { code: String, message: String },
    StateChanged(ConnectionState),
}

struct Link {
    subscriptions: Subscriptions,
    /// Present only while a socket is live.
    outgoing: Option<UnboundedSender<ClientFrame>>,
}

/// State shared between the handle and the connection driver.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) shutdown: Notify,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    link: Mutex<Link>,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            shutdown: Notify::new(),
            state,
            events,
            link: Mutex::new(Link {
                subscriptions: Subscriptions::new(),
                outgoing: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            tracing::debug!("Connection state -> {:?}", state);
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Install a fresh socket's sender and replay every wanted room on it.
    pub(crate) fn attach(&self, sender: UnboundedSender<ClientFrame>) {
        let mut link = self.link.lock();
        if self.is_closed() {
            return;
        }
        let frames = link.subscriptions.rejoin_frames();
        if !frames.is_empty() {
            tracing::info!("Rejoining {} stream(s)", frames.len());
        }
        for frame in frames {
            let _ = sender.unbounded_send(frame);
        }
        link.outgoing = Some(sender);
        self.set_state(ConnectionState::live(link.subscriptions.rooms().clone()));
    }

    pub(crate) fn detach(&self) {
        self.link.lock().outgoing = None;
    }

    fn request_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.detach();
        self.shutdown.notify_one();
    }

    fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let link = self.link.lock();
        let sender = link.outgoing.as_ref().ok_or(ClientError::NotConnected)?;
        sender
            .unbounded_send(frame)
            .map_err(|_| ClientError::NotConnected)
    }

    fn join(&self, stream_id: &str) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        validate_stream_id(stream_id).map_err(|e| ClientError::InvalidStreamId(e.to_string()))?;
        let mut link = self.link.lock();
        if !link.subscriptions.want(stream_id) {
            return Ok(());
        }
        if let Some(sender) = &link.outgoing {
            let _ = sender.unbounded_send(ClientFrame::JoinStream {
                stream_id: stream_id.to_string(),
            });
            self.set_state(ConnectionState::live(link.subscriptions.rooms().clone()));
        }
        Ok(())
    }

    fn leave(&self, stream_id: &str) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let mut link = self.link.lock();
        if !link.subscriptions.unwant(stream_id) {
            return Ok(());
        }
        if let Some(sender) = &link.outgoing {
            let _ = sender.unbounded_send(ClientFrame::LeaveStream {
                stream_id: stream_id.to_string(),
            });
            self.set_state(ConnectionState::live(link.subscriptions.rooms().clone()));
        }
        Ok(())
    }

    /// Decode one inbound text frame and fan it out to subscribers.
    pub(crate) fn handle_text(&self, text: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to parse server frame: {}", e);
                return;
            }
        };
        let event = match frame {
            ServerFrame::ChatMessage(message) => ClientEvent::Chat(message),
            ServerFrame::StreamViewerCount { stream_id, count } => {
                ClientEvent::ViewerCount { stream_id, count }
            }
            ServerFrame::FollowEvent(event) => ClientEvent::Follow(event),
            ServerFrame::Error { code, message } => {
                tracing::debug!("Hub error {}: {}", code, message);
                ClientEvent::ServerError { code, message }
            }
            ServerFrame::Pong => {
                tracing::trace!("pong");
                return;
            }
        };
        self.emit(event);
    }
}

/// A reconnecting connection to the hub.
pub struct LiveClient {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClient {
    /// Start connecting in the background. Must be called inside a tokio
    /// runtime; only an unusable URL fails here.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = config.endpoint()?;
        let shared = Arc::new(Shared::new(config));
        let driver = tokio::spawn(run_connection_loop(shared.clone(), endpoint));
        Ok(Self {
            shared,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Rooms this client wants to observe, joined now or on next connect.
    pub fn rooms(&self) -> BTreeSet<StreamId> {
        self.shared.link.lock().subscriptions.rooms().clone()
    }

    /// Observe a stream. Remembered while offline and replayed on reconnect.
    /// Ids the hub would refuse (blank, over 128 bytes) are rejected here and
    /// never remembered.
    pub fn join_stream(&self, stream_id: &str) -> Result<(), ClientError> {
        self.shared.join(stream_id)
    }

    pub fn leave_stream(&self, stream_id: &str) -> Result<(), ClientError> {
        self.shared.leave(stream_id)
    }

    pub fn send_chat_message(&self, stream_id: &str, content: &str) -> Result<(), ClientError> {
        self.shared.send(ClientFrame::ChatMessage {
            stream_id: stream_id.to_string(),
            content: content.to_string(),
        })
    }

    pub fn follow_user(&self, target_id: &str) -> Result<(), ClientError> {
        self.shared.send(ClientFrame::FollowUser {
            target_id: target_id.to_string(),
        })
    }

    pub fn unfollow_user(&self, target_id: &str) -> Result<(), ClientError> {
        self.shared.send(ClientFrame::UnfollowUser {
            target_id: target_id.to_string(),
        })
    }

    /// Close the socket and stop reconnecting. Terminal.
    pub async fn close(&self) {
        self.shared.request_close();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::warn!("Connection driver ended abnormally: {}", e);
            }
        }
        self.shared.set_state(ConnectionState::Closed);
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.shared.request_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;
    use std::time::Duration;

    fn shared() -> Shared {
        Shared::new(ClientConfig::new("ws://127.0.0.1:9/api/ws"))
    }

    #[test]
    fn offline_actions_fail_fast_but_joins_are_remembered() {
        let shared = shared();
        assert_eq!(shared.join("s1"), Ok(()));
        assert_eq!(
            shared.send(ClientFrame::ChatMessage {
                stream_id: "s1".into(),
                content: "hi".into(),
            }),
            Err(ClientError::NotConnected)
        );
        assert!(shared.link.lock().subscriptions.contains("s1"));
    }

    #[test]
    fn attach_replays_rooms_and_reports_joined() {
        let shared = shared();
        shared.join("s2").unwrap();
        shared.join("s1").unwrap();

        let (tx, mut rx) = unbounded();
        shared.attach(tx);
        assert_eq!(
            *shared.state.borrow(),
            ConnectionState::Joined {
                rooms: BTreeSet::from(["s1".to_string(), "s2".to_string()])
            }
        );
        let mut replayed = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            replayed.push(frame);
        }
        assert_eq!(
            replayed,
            vec![
                ClientFrame::JoinStream { stream_id: "s1".into() },
                ClientFrame::JoinStream { stream_id: "s2".into() },
            ]
        );

        // joining a wanted room again sends nothing
        shared.join("s1").unwrap();
        assert!(rx.try_next().is_err());

        shared.leave("s1").unwrap();
        shared.leave("s2").unwrap();
        assert_eq!(*shared.state.borrow(), ConnectionState::Connected);
        assert_eq!(
            rx.try_next().unwrap(),
            Some(ClientFrame::LeaveStream { stream_id: "s1".into() })
        );

        shared.detach();
        assert_eq!(shared.send(ClientFrame::Ping), Err(ClientError::NotConnected));
    }

    #[test]
    fn refused_stream_ids_are_never_remembered() {
        let shared = shared();
        let (tx, mut rx) = unbounded();
        shared.attach(tx);

        let long = "x".repeat(129);
        for bad in ["", "   ", long.as_str()] {
            assert!(matches!(shared.join(bad), Err(ClientError::InvalidStreamId(_))));
        }
        assert_eq!(*shared.state.borrow(), ConnectionState::Connected);
        assert!(rx.try_next().is_err());

        // nothing to replay on the next connection either
        shared.detach();
        let (tx, mut rx) = unbounded();
        shared.attach(tx);
        assert!(rx.try_next().is_err());
        assert!(shared.link.lock().subscriptions.rooms().is_empty());
    }

    #[test]
    fn state_transitions_are_published_once_each() {
        let shared = shared();
        let mut events = shared.events.subscribe();
        shared.set_state(ConnectionState::Connecting { attempt: 0 });
        shared.set_state(ConnectionState::Connecting { attempt: 0 });
        shared.set_state(ConnectionState::Connected);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::StateChanged(ConnectionState::Connecting { attempt: 0 })
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::StateChanged(ConnectionState::Connected)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_hub_counts_attempts_then_fails() {
        // nothing listens on the freed port
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = ClientConfig::new(format!("ws://{addr}/api/ws")).with_reconnect(
            crate::ws::ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_attempts: Some(2),
                ..Default::default()
            },
        );
        let client = LiveClient::connect(config).unwrap();
        let mut events = client.subscribe();

        let mut states = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ClientEvent::StateChanged(state) = events.recv().await.unwrap() {
                    let done = state.is_terminal();
                    states.push(state);
                    if done {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            states[..4],
            [
                ConnectionState::Connecting { attempt: 0 },
                ConnectionState::Disconnected,
                ConnectionState::Connecting { attempt: 1 },
                ConnectionState::Disconnected,
            ]
        );
        assert_eq!(states.len(), 5);
        assert!(matches!(states[4], ConnectionState::Failed { .. }));
        assert!(matches!(client.state(), ConnectionState::Failed { .. }));
        client.close().await;
    }

    #[test]
    fn closed_client_rejects_everything() {
        let shared = shared();
        shared.request_close();
        assert_eq!(shared.join("s1"), Err(ClientError::Closed));
        assert_eq!(shared.send(ClientFrame::Ping), Err(ClientError::Closed));
    }

    #[test]
    fn server_frames_become_typed_events() {
        let shared = shared();
        let mut events = shared.events.subscribe();

        shared.handle_text(r#"{"type":"stream_viewer_count","data":{"streamId":"s1","count":3}}"#);
        shared.handle_text(r#"{"type":"pong"}"#);
        shared.handle_text("not json");
        shared.handle_text(r#"{"type":"error","data":{"code":"NOT_MEMBER","message":"nope"}}"#);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ViewerCount {
                stream_id: "s1".into(),
                count: 3
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ServerError {
                code: "NOT_MEMBER".into(),
                message: "nope".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_hub_keeps_retrying_until_closed() {
        let config = ClientConfig::new("ws://127.0.0.1:9/api/ws").with_reconnect(
            crate::ws::ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let client = LiveClient::connect(config).unwrap();
        client.join_stream("s1").unwrap();
        assert_eq!(client.follow_user("bob"), Err(ClientError::NotConnected));
        assert!(!client.is_connected());

        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.join_stream("s2"), Err(ClientError::Closed));
    }
}
