//! Session registry (C6) and fan-out gateway (C8).
//!
//! Tracks every live or reconnect-eligible session, keyed by `session_id`,
//! with an `owner_id` index for fan-out and an `(owner_id, device_id)` index
//! so a reconnecting device resumes its prior session instead of starting a
//! fresh identity. A session that drops its transport is not removed
//! immediately: it is held, disconnected, for the configured reconnect
//! window so `try_resume` can hand it back to the same device.
//!
//! Every lock here is a `std::sync::Mutex` guarding plain in-memory state;
//! none is ever held across an `.await` point.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use vectorsync_engine::{Session, SessionState};

use super::ServerMessage;

/// Sender half of a session's bounded outbound queue.
pub type MessageSender = mpsc::Sender<ServerMessage>;

/// Whether a send to a session's outbound queue succeeded.
pub enum SendOutcome {
    Sent,
    /// The session is not registered (already closed).
    NotFound,
    /// The outbound buffer is full; the caller should drain the session.
    Backpressure,
}

struct SessionHandle {
    session: Mutex<Session>,
    sender: Mutex<MessageSender>,
    /// `Some(t)` once the transport has dropped; cleared on resume. A
    /// handle with `disconnected_at` set is still indexed by `by_device` so
    /// a reconnecting device can find it.
    disconnected_at: Mutex<Option<Instant>>,
}

/// Tracks every session and the owner/device indexes used for fan-out and
/// reconnect resume.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    by_owner: DashMap<String, Vec<String>>,
    by_device: DashMap<(String, String), String>,
    /// When an owner last had zero sessions (live or disconnected-held).
    owner_idle_since: DashMap<String, Instant>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a freshly-handshaked session with its outbound channel.
    pub fn register(&self, session: Session, sender: MessageSender) {
        let owner_id = session.owner_id.clone();
        let device_id = session.device_id.clone();
        let session_id = session.session_id.clone();

        self.owner_idle_since.remove(&owner_id);
        self.sessions.insert(
            session_id.clone(),
            SessionHandle {
                session: Mutex::new(session),
                sender: Mutex::new(sender),
                disconnected_at: Mutex::new(None),
            },
        );
        let mut ids = self.by_owner.entry(owner_id.clone()).or_default();
        if !ids.contains(&session_id) {
            ids.push(session_id.clone());
        }
        drop(ids);
        self.by_device.insert((owner_id, device_id), session_id);

        tracing::info!(sessions = self.sessions.len(), "session registered");
    }

    /// Mark a session's transport as dropped without discarding its state.
    /// It stays resumable until the reconnect window elapses (see
    /// `reap_expired`). Once every session of `owner_id` is disconnected,
    /// the owner starts its idle-teardown clock.
    pub fn disconnect(&self, session_id: &str, owner_id: &str) {
        if let Some(handle) = self.sessions.get(session_id) {
            *handle.disconnected_at.lock().unwrap() = Some(Instant::now());
        }
        let all_disconnected = self
            .by_owner
            .get(owner_id)
            .map(|ids| ids.iter().all(|id| self.is_disconnected(id)))
            .unwrap_or(true);
        if all_disconnected {
            self.owner_idle_since.insert(owner_id.to_string(), Instant::now());
        }
    }

    fn is_disconnected(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|h| h.disconnected_at.lock().unwrap().is_some())
            .unwrap_or(true)
    }

    /// Fully remove a session: used once its reconnect window has elapsed,
    /// or to drop a session outright without holding it for resume.
    pub fn unregister(&self, session_id: &str, owner_id: &str) {
        self.sessions.remove(session_id);
        if let Some(mut ids) = self.by_owner.get_mut(owner_id) {
            ids.retain(|id| id != session_id);
            if ids.is_empty() {
                drop(ids);
                self.by_owner.remove(owner_id);
            }
        }
        self.by_device.retain(|_, v| v != session_id);
    }

    /// If `(owner_id, device_id)` has a disconnected, not-yet-expired
    /// session, return its id and last acknowledged sequence so the new
    /// connection can resume it instead of starting fresh.
    pub fn try_resume(&self, owner_id: &str, device_id: &str, reconnect_window_secs: u64) -> Option<(String, u64)> {
        let key = (owner_id.to_string(), device_id.to_string());
        let session_id = self.by_device.get(&key)?.clone();
        let handle = self.sessions.get(&session_id)?;
        let disconnected_at = (*handle.disconnected_at.lock().unwrap())?;
        if disconnected_at.elapsed() > Duration::from_secs(reconnect_window_secs) {
            return None;
        }
        let last_ack_seq = handle.session.lock().unwrap().last_ack_seq;
        Some((session_id, last_ack_seq))
    }

    /// Re-attach a new connection's outbound channel to a resumed session
    /// and clear its disconnected marker.
    pub fn resume(&self, session_id: &str, sender: MessageSender) -> bool {
        let Some(handle) = self.sessions.get(session_id) else {
            return false;
        };
        *handle.sender.lock().unwrap() = sender;
        *handle.disconnected_at.lock().unwrap() = None;
        let owner_id = handle.session.lock().unwrap().owner_id.clone();
        self.owner_idle_since.remove(&owner_id);
        true
    }

    /// Remove every session whose reconnect window has elapsed. Returns the
    /// owners that lost their last held session, so the caller can decide
    /// whether to also tear down that owner's bus topic.
    pub fn reap_expired(&self, reconnect_window_secs: u64) -> Vec<String> {
        let deadline = Duration::from_secs(reconnect_window_secs);
        let expired: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let disconnected_at = (*entry.value().disconnected_at.lock().unwrap())?;
                if disconnected_at.elapsed() > deadline {
                    let owner_id = entry.value().session.lock().unwrap().owner_id.clone();
                    Some((owner_id, entry.key().clone()))
                } else {
                    None
                }
            })
            .collect();

        let mut drained_owners = Vec::new();
        for (owner_id, session_id) in expired {
            self.unregister(&session_id, &owner_id);
            if !self.by_owner.contains_key(&owner_id) {
                drained_owners.push(owner_id);
            }
        }
        drained_owners
    }

    /// Owners with zero sessions (live or held for reconnect) for at least
    /// `idle_secs`. Clears their idle marker as it reports them, so each
    /// owner is only reported once per idle period.
    pub fn idle_owners(&self, idle_secs: u64) -> Vec<String> {
        let threshold = Duration::from_secs(idle_secs);
        let idle: Vec<String> = self
            .owner_idle_since
            .iter()
            .filter(|entry| entry.value().elapsed() >= threshold)
            .map(|entry| entry.key().clone())
            .collect();
        for owner_id in &idle {
            self.owner_idle_since.remove(owner_id);
        }
        idle
    }

    pub fn transition(&self, session_id: &str, next: SessionState) -> vectorsync_engine::error::Result<()> {
        let Some(handle) = self.sessions.get(session_id) else {
            return Ok(());
        };
        handle.session.lock().unwrap().transition(next)
    }

    pub fn ack(&self, session_id: &str, up_to_seq: u64) {
        if let Some(handle) = self.sessions.get(session_id) {
            handle.session.lock().unwrap().ack(up_to_seq);
        }
    }

    pub fn last_ack_seq(&self, session_id: &str) -> Option<u64> {
        let handle = self.sessions.get(session_id)?;
        Some(handle.session.lock().unwrap().last_ack_seq)
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(handle) => handle.session.lock().unwrap().is_live(),
            None => false,
        }
    }

    /// Deliver `message` to one session's outbound queue without blocking.
    pub fn send_to(&self, session_id: &str, message: ServerMessage) -> SendOutcome {
        let Some(handle) = self.sessions.get(session_id) else {
            return SendOutcome::NotFound;
        };
        match handle.sender.lock().unwrap().try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Backpressure,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotFound,
        }
    }

    /// Every session (live or reconnect-held) subscribed to `owner_id`.
    pub fn sessions_for_owner(&self, owner_id: &str) -> Vec<String> {
        self.by_owner.get(owner_id).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Devices of `owner_id`, other than `exclude_device`, that this process
    /// has seen before but has no live connection for right now. A commit
    /// landing while these peers are offline can't reach them through the
    /// bus (nothing is polling it), so the caller enqueues it for them.
    pub fn offline_peer_devices(&self, owner_id: &str, exclude_device: &str) -> Vec<String> {
        self.by_device
            .iter()
            .filter_map(|entry| {
                let (entry_owner, device_id) = entry.key();
                if entry_owner != owner_id || device_id == exclude_device {
                    return None;
                }
                let session_id = entry.value();
                (!self.is_live(session_id)).then(|| device_id.clone())
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn owner_count(&self) -> usize {
        self.by_owner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_unregister_tracks_owner_index() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let session = Session::new("s1", "owner-1", "d1", 1000);

        registry.register(session, tx);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.owner_count(), 1);
        assert_eq!(registry.sessions_for_owner("owner-1"), vec!["s1".to_string()]);

        registry.unregister("s1", "owner-1");
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.owner_count(), 0);
    }

    #[tokio::test]
    async fn send_to_reports_backpressure_on_full_channel() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let session = Session::new("s1", "owner-1", "d1", 1000);
        registry.register(session, tx);

        assert!(matches!(
            registry.send_to("s1", ServerMessage::error(None, "protocol", "x", false)),
            SendOutcome::Sent
        ));
        assert!(matches!(
            registry.send_to("s1", ServerMessage::error(None, "protocol", "y", false)),
            SendOutcome::Backpressure
        ));

        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn ack_is_visible_through_registry() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(Session::new("s1", "owner-1", "d1", 1000), tx);

        registry.ack("s1", 5);
        assert_eq!(registry.last_ack_seq("s1"), Some(5));
    }

    #[tokio::test]
    async fn disconnected_session_resumes_within_window() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(Session::new("s1", "owner-1", "d1", 1000), tx);
        registry.ack("s1", 7);

        registry.disconnect("s1", "owner-1");
        let resumed = registry.try_resume("owner-1", "d1", 60);
        assert_eq!(resumed, Some(("s1".to_string(), 7)));

        let (tx2, _rx2) = mpsc::channel(8);
        assert!(registry.resume("s1", tx2));
        assert_eq!(registry.try_resume("owner-1", "d1", 60), Some(("s1".to_string(), 7)));
    }

    #[tokio::test]
    async fn reap_expired_drops_sessions_past_the_window() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(Session::new("s1", "owner-1", "d1", 1000), tx);
        registry.disconnect("s1", "owner-1");

        // 0-second window: any disconnected session is immediately expired.
        let drained_owners = registry.reap_expired(0);
        assert_eq!(drained_owners, vec!["owner-1".to_string()]);
        assert_eq!(registry.session_count(), 0);
        assert!(registry.try_resume("owner-1", "d1", 60).is_none());
    }

    #[tokio::test]
    async fn idle_owners_reports_and_clears_once() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(Session::new("s1", "owner-1", "d1", 1000), tx);
        registry.disconnect("s1", "owner-1");
        registry.reap_expired(0);

        assert_eq!(registry.idle_owners(0), vec!["owner-1".to_string()]);
        // Reported once; a second immediate call finds nothing left to report.
        assert!(registry.idle_owners(0).is_empty());
    }
}
