//! livehub client: a reconnecting websocket client for the livehub hub.
//!
//! ```rust,ignore
//! let client = LiveClient::connect(
//!     ClientConfig::new("ws://localhost:8080/api/ws").with_token(token),
//! )?;
//! let mut events = client.subscribe();
//! client.join_stream("stream-42")?;
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Chat(msg) = event {
//!         println!("{}: {}", msg.username, msg.content);
//!     }
//! }
//! ```

pub mod client;
pub mod ws;

pub use client::{ClientEvent, LiveClient};
pub use livehub_shared::ClientError;
pub use ws::{ClientConfig, ConnectionState, ReconnectConfig, Subscriptions};
