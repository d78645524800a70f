//! Live session bookkeeping: connection id → session, user id → connections.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livehub_shared::{ConnectionId, StreamId, UserId, ViewerProfile};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::outbox::Outbox;

/// Rooms a session has joined. `closed` is set once, by the disconnect that
/// tears the session down; joins after that point are refused.
#[derive(Debug, Default)]
pub struct SessionRooms {
    pub joined: HashSet<StreamId>,
    pub closed: bool,
}

/// One live connection.
pub struct Session {
    pub id: ConnectionId,
    /// `None` for anonymous viewers.
    pub profile: Option<ViewerProfile>,
    pub outbox: Outbox,
    pub connected_at: DateTime<Utc>,
    last_activity: parking_lot::Mutex<Instant>,
    /// When each recent protocol violation happened, oldest first.
    violations: parking_lot::Mutex<VecDeque<Instant>>,
    rooms: Mutex<SessionRooms>,
}

impl Session {
    pub fn new(profile: Option<ViewerProfile>, outbox: Outbox) -> Self {
        Self {
            id: ConnectionId::new(),
            profile,
            outbox,
            connected_at: Utc::now(),
            last_activity: parking_lot::Mutex::new(Instant::now()),
            violations: parking_lot::Mutex::new(VecDeque::new()),
            rooms: Mutex::new(SessionRooms::default()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.user_id.as_str())
    }

    /// Name shown next to chat messages.
    pub fn display_name(&self) -> String {
        match &self.profile {
            Some(profile) => profile.username.clone(),
            None => format!("viewer-{}", self.id.short()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    /// Count one protocol violation at `now`, returning how many fell within
    /// the trailing `window` (this one included).
    pub fn record_violation(&self, now: Instant, window: Duration) -> u32 {
        let mut violations = self.violations.lock();
        while violations
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= window)
        {
            violations.pop_front();
        }
        violations.push_back(now);
        violations.len() as u32
    }

    /// Serializes join/leave/disconnect for this connection.
    pub async fn rooms(&self) -> tokio::sync::MutexGuard<'_, SessionRooms> {
        self.rooms.lock().await
    }
}

#[derive(Default)]
struct Directory {
    sessions: HashMap<ConnectionId, Arc<Session>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Index of every live session, shared by the gateway and the social relay.
#[derive(Default)]
pub struct SessionDirectory {
    inner: RwLock<Directory>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        let mut dir = self.inner.write().await;
        if let Some(user_id) = session.user_id() {
            dir.by_user
                .entry(user_id.to_string())
                .or_default()
                .insert(session.id);
        }
        dir.sessions.insert(session.id, session);
    }

    /// Remove a session. Only the first call for a given id returns it.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        let mut dir = self.inner.write().await;
        let session = dir.sessions.remove(&id)?;
        if let Some(user_id) = session.user_id() {
            if let Some(connections) = dir.by_user.get_mut(user_id) {
                connections.remove(&id);
                if connections.is_empty() {
                    dir.by_user.remove(user_id);
                }
            }
        }
        Some(session)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.inner.read().await.sessions.get(&id).cloned()
    }

    /// All live sessions authenticated as `user_id`.
    pub async fn for_user(&self, user_id: &str) -> Vec<Arc<Session>> {
        let dir = self.inner.read().await;
        dir.by_user
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| dir.sessions.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.sessions.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(user_id: &str) -> ViewerProfile {
        ViewerProfile {
            user_id: user_id.into(),
            username: format!("{user_id}-name"),
            avatar: None,
            verified: false,
        }
    }

    #[tokio::test]
    async fn user_index_tracks_every_connection() {
        let dir = SessionDirectory::new();
        let a1 = Arc::new(Session::new(Some(profile("a")), Outbox::new(4)));
        let a2 = Arc::new(Session::new(Some(profile("a")), Outbox::new(4)));
        let anon = Arc::new(Session::new(None, Outbox::new(4)));
        dir.insert(a1.clone()).await;
        dir.insert(a2.clone()).await;
        dir.insert(anon.clone()).await;

        assert_eq!(dir.len().await, 3);
        assert_eq!(dir.for_user("a").await.len(), 2);

        assert!(dir.remove(a1.id).await.is_some());
        assert!(dir.remove(a1.id).await.is_none());
        let left = dir.for_user("a").await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, a2.id);

        dir.remove(a2.id).await;
        assert!(dir.for_user("a").await.is_empty());
    }

    #[test]
    fn anonymous_sessions_get_generated_names() {
        let anon = Session::new(None, Outbox::new(1));
        assert!(anon.display_name().starts_with("viewer-"));
        assert_eq!(anon.user_id(), None);

        let named = Session::new(Some(profile("u1")), Outbox::new(1));
        assert_eq!(named.display_name(), "u1-name");
    }

    #[tokio::test(start_paused = true)]
    async fn violations_only_count_within_the_window() {
        let session = Session::new(None, Outbox::new(1));
        let window = Duration::from_secs(60);

        assert_eq!(session.record_violation(Instant::now(), window), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(session.record_violation(Instant::now(), window), 2);
        tokio::time::advance(Duration::from_secs(30)).await;
        // the first one has aged out
        assert_eq!(session.record_violation(Instant::now(), window), 2);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(session.record_violation(Instant::now(), window), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_resets_on_touch() {
        let session = Session::new(None, Outbox::new(1));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(session.idle_for(Instant::now()), Duration::from_secs(20));
        session.touch();
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);
    }
}
