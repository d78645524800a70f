//! The real-time hub: an explicitly started service wiring the gateway, room
//! registry, presence aggregator, chat broadcaster and social relay together.
//!
//! ```text
//!   socket ──► Gateway ──► RoomRegistry ──(changes)──► PresenceAggregator
//!                 │             ▲                             │
//!                 ├──► ChatBroadcaster (room lock, sequence)  │
//!                 └──► SocialRelay ──► SessionDirectory       │
//!                                                             ▼
//!                         per-connection Outbox ◄─────────────┘
//! ```

pub mod chat;
pub mod gateway;
pub mod outbox;
pub mod presence;
pub mod rooms;
pub mod sessions;
pub mod social;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::HubConfig;
use crate::identity::IdentityProvider;
use chat::{ChatBroadcaster, ChatPolicy};
use gateway::{DisconnectReason, Gateway, GatewaySettings};
use presence::PresenceAggregator;
use rooms::RoomRegistry;
use sessions::SessionDirectory;
use social::SocialRelay;

pub use gateway::{Connection, Credentials, FrameOutcome};
pub use outbox::Outbox;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

pub struct Hub {
    gateway: Arc<Gateway>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Build the hub and spawn its background tasks (presence aggregator and
    /// heartbeat sweeper). Must be called inside a tokio runtime.
    pub fn start(config: &HubConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(SessionDirectory::new());
        let rooms = Arc::new(RoomRegistry::new(changes_tx, config.room_reap_after));

        let presence =
            PresenceAggregator::new(rooms.clone(), changes_rx, config.presence_debounce).spawn();

        let chat = ChatBroadcaster::new(
            rooms.clone(),
            ChatPolicy {
                max_chars: config.max_message_chars,
                allow_anonymous: config.allow_anonymous_chat,
            },
        );
        let social = SocialRelay::new(sessions.clone());
        let gateway = Arc::new(Gateway::new(
            GatewaySettings {
                heartbeat_timeout: config.heartbeat_timeout,
                max_frame_violations: config.max_frame_violations.max(1),
                frame_violation_window: config.frame_violation_window,
                outbound_capacity: config.outbound_capacity,
            },
            identity,
            sessions,
            rooms,
            chat,
            social,
        ));

        let sweeper = spawn_heartbeat_sweeper(gateway.clone(), config.heartbeat_sweep);

        tracing::info!(
            "Hub started (heartbeat timeout {:?}, presence debounce {:?})",
            config.heartbeat_timeout,
            config.presence_debounce
        );
        Self {
            gateway,
            tasks: Mutex::new(vec![presence, sweeper]),
        }
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    /// Disconnect every live session and stop the background tasks.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        let closed = self.gateway.disconnect_all(DisconnectReason::Shutdown).await;
        for task in tasks {
            task.abort();
        }
        tracing::info!("Hub stopped, closed {} connection(s)", closed);
    }
}

fn spawn_heartbeat_sweeper(gateway: Arc<Gateway>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let dropped = gateway.sweep_idle().await;
            if !dropped.is_empty() {
                tracing::debug!("Heartbeat sweep dropped {} connection(s)", dropped.len());
            }
        }
    })
}
