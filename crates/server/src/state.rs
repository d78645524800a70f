//! Application state shared across request handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::hub::gateway::Gateway;
use crate::hub::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(hub: &Hub) -> Self {
        Self {
            gateway: hub.gateway(),
            started_at: Utc::now(),
        }
    }
}
