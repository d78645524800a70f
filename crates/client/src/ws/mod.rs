//! WebSocket layer: connection state, reconnect policy, the connection
//! driver and desired-room bookkeeping.
//!
//! ```text
//!   LiveClient ──(frames)──► driver ──► hub socket
//!       ▲                      │
//!       └──(ClientEvent)───────┘   on connect: replay Subscriptions
//! ```

mod connection;
mod manager;

pub use connection::{ClientConfig, ConnectionState, ReconnectConfig};
pub(crate) use connection::run_connection_loop;
pub use manager::Subscriptions;
