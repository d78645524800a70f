//! livehub server: real-time chat, viewer presence and follow notifications
//! for live streams over a single websocket endpoint.

pub mod config;
pub mod hub;
pub mod identity;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::HubConfig;
pub use hub::Hub;
pub use routes::router;
pub use state::AppState;
