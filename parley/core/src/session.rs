//! Session State
//!
//! A session is one conversational context: a model, a display sink and the
//! history of assistant messages received so far. Sessions are owned by the
//! [`SessionStore`](crate::store::SessionStore); everything handed out to
//! callers is a [`SessionSnapshot`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::AssistantMessage;
use crate::sink::SinkHandle;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Active Flag
// ============================================================================

/// Shared liveness flag of a session
///
/// The store clears it when the session ends; an in-flight turn checks it
/// before every sink write and history append.
#[derive(Clone, Debug)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    /// A set flag
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Whether the session is still active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the session ended
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Coarse lifecycle state, as reported in snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Waiting for a prompt
    Idle,
    /// A turn is streaming
    Streaming,
    /// Ended; never reused
    Ended,
}

/// One conversational session
#[derive(Debug)]
pub struct Session {
    /// Immutable identifier
    pub id: SessionId,
    /// Model used for the next turn
    pub model: String,
    /// Destination of rendered output
    pub sink: SinkHandle,
    /// Assistant messages, in arrival order
    pub history: Vec<AssistantMessage>,
    /// Liveness flag shared with in-flight turns
    pub active: ActiveFlag,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Last create/send/switch/set-current touching this session
    pub last_activity: Instant,
    /// Cancellation token of the in-flight turn, if any
    pub turn: Option<CancellationToken>,
    /// Number of turns finished
    pub turns: u64,
}

impl Session {
    /// Create an active session
    #[must_use]
    pub fn new(sink: SinkHandle, model: impl Into<String>, now: Instant) -> Self {
        Self {
            id: SessionId::new(),
            model: model.into(),
            sink,
            history: Vec::new(),
            active: ActiveFlag::new(),
            created_at: Utc::now(),
            last_activity: now,
            turn: None,
            turns: 0,
        }
    }

    /// Whether the session is still active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// Whether a turn is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.turn.is_some()
    }

    /// Mark activity
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time since last activity
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Coarse lifecycle state
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if !self.is_active() {
            SessionStatus::Ended
        } else if self.is_busy() {
            SessionStatus::Streaming
        } else {
            SessionStatus::Idle
        }
    }

    /// End the session and cancel any in-flight turn
    pub fn deactivate(&mut self) {
        self.active.clear();
        if let Some(token) = self.turn.take() {
            token.cancel();
        }
    }

    /// Detached copy for callers
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            model: self.model.clone(),
            sink: self.sink,
            history: self.history.clone(),
            active: self.is_active(),
            busy: self.is_busy(),
            status: self.status(),
            created_at: self.created_at,
            idle_ms: u64::try_from(self.idle_for(now).as_millis()).unwrap_or(u64::MAX),
            turns: self.turns,
        }
    }
}

/// Read-only copy of a session
///
/// Mutating a snapshot never affects the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session identifier
    pub id: SessionId,
    /// Current model
    pub model: String,
    /// Sink handle
    pub sink: SinkHandle,
    /// Assistant messages so far
    pub history: Vec<AssistantMessage>,
    /// Still active
    pub active: bool,
    /// Turn in flight
    pub busy: bool,
    /// Coarse state
    pub status: SessionStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Milliseconds since last activity
    pub idle_ms: u64,
    /// Turns finished
    pub turns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_round_trips_through_string() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_active_flag_shared_between_clones() {
        let flag = ActiveFlag::new();
        let seen_by_turn = flag.clone();
        assert!(seen_by_turn.is_active());

        flag.clear();
        assert!(!seen_by_turn.is_active());
    }

    #[test]
    fn test_new_session_is_idle_and_active() {
        let now = Instant::now();
        let session = Session::new(SinkHandle(1), "sonnet", now);
        assert!(session.is_active());
        assert!(!session.is_busy());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.idle_for(now), Duration::ZERO);
    }

    #[test]
    fn test_deactivate_cancels_turn() {
        let mut session = Session::new(SinkHandle(1), "sonnet", Instant::now());
        let token = CancellationToken::new();
        session.turn = Some(token.clone());
        assert_eq!(session.status(), SessionStatus::Streaming);

        session.deactivate();
        assert!(token.is_cancelled());
        assert_eq!(session.status(), SessionStatus::Ended);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let now = Instant::now();
        let mut session = Session::new(SinkHandle(3), "sonnet", now);
        session.history.push(AssistantMessage::text("hi"));

        let mut snapshot = session.snapshot(now + Duration::from_millis(1500));
        assert_eq!(snapshot.idle_ms, 1500);
        snapshot.history.clear();
        snapshot.model = "opus".to_string();

        assert_eq!(session.history.len(), 1);
        assert_eq!(session.model, "sonnet");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let now = Instant::now();
        let session = Session::new(SinkHandle(9), "sonnet", now);
        let json = serde_json::to_value(session.snapshot(now)).unwrap();
        assert_eq!(json["sink"], 9);
        assert_eq!(json["status"], "idle");
        assert!(json.get("idleMs").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
