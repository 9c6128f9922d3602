//! Session Store
//!
//! Mapping of session id to session state, with a capacity limit, an idle
//! timeout and a weak "current session" pointer.
//!
//! # Eviction
//!
//! Every `create` first sweeps the store: sessions that are no longer
//! active, or whose last activity is older than the session timeout, are
//! removed. Only then is capacity checked.
//!
//! # Current session
//!
//! The current session is stored as an id and re-validated on every read,
//! so it always names a live, active session or nothing.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::AssistantMessage;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{SessionError, SessionResult};
use crate::session::{ActiveFlag, Session, SessionId, SessionSnapshot};
use crate::sink::SinkHandle;
use crate::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TIMEOUT};

/// What a turn needs to run, handed out by [`SessionStore::begin_turn`]
#[derive(Clone, Debug)]
pub struct TurnTicket {
    /// Session the turn belongs to
    pub session_id: SessionId,
    /// Model at turn start
    pub model: String,
    /// Destination of rendered output
    pub sink: SinkHandle,
    /// Session liveness, checked before every write
    pub active: ActiveFlag,
    /// Cancelled when the session ends
    pub cancel: CancellationToken,
}

/// Outcome of [`SessionStore::switch_model`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSwitch {
    /// Sink of the session
    pub sink: SinkHandle,
    /// Model before the switch
    pub previous: String,
    /// Whether the turn slot was taken for the notice; false when a turn
    /// was already in flight
    pub reserved: bool,
}

/// All sessions of the process
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
    current: Option<SessionId>,
    max_sessions: usize,
    session_timeout: Duration,
    clock: SharedClock,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_SESSIONS,
            DEFAULT_SESSION_TIMEOUT,
            std::sync::Arc::new(SystemClock),
        )
    }
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new(max_sessions: usize, session_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            sessions: HashMap::new(),
            current: None,
            max_sessions,
            session_timeout,
            clock,
        }
    }

    /// Capacity
    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Idle timeout
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Number of stored sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a session bound to `sink` and make it current
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CapacityExceeded`] if the store is still full
    /// after evicting inactive and idle sessions.
    pub fn create(&mut self, sink: SinkHandle, model: &str) -> SessionResult<SessionId> {
        self.evict_expired();

        if self.sessions.len() >= self.max_sessions {
            return Err(SessionError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        if let Some(owner) = self.session_for_sink(sink) {
            warn!(
                sink = %sink,
                owner = %owner,
                "Sink already bound to a live session; their turns may interleave"
            );
        }

        let session = Session::new(sink, model, self.clock.now());
        let id = session.id;
        self.sessions.insert(id, session);
        self.current = Some(id);

        info!(
            session_id = %id,
            model = %model,
            sink = %sink,
            sessions = self.sessions.len(),
            "Created session"
        );
        Ok(id)
    }

    /// Active session bound to `sink`, if any
    #[must_use]
    pub fn session_for_sink(&self, sink: SinkHandle) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.sink == sink && s.is_active())
            .map(|s| s.id)
    }

    /// End a session and remove it
    ///
    /// Unknown ids are ignored. Any in-flight turn is cancelled. Returns
    /// whether a session was removed.
    pub fn end(&mut self, id: SessionId) -> bool {
        let Some(mut session) = self.sessions.remove(&id) else {
            debug!(session_id = %id, "End of unknown session ignored");
            return false;
        };

        session.deactivate();
        if self.current == Some(id) {
            self.current = None;
        }

        info!(
            session_id = %id,
            turns = session.turns,
            sessions = self.sessions.len(),
            "Ended session"
        );
        true
    }

    /// End every session
    pub fn end_all(&mut self) -> usize {
        let ids = self.list_ids();
        ids.into_iter().filter(|id| self.end(*id)).count()
    }

    /// Remove inactive and idle-timed-out sessions
    ///
    /// Returns the evicted ids. Never touches any sink.
    pub fn evict_expired(&mut self) -> Vec<SessionId> {
        let now = self.clock.now();
        let timeout = self.session_timeout;

        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| !s.is_active() || s.idle_for(now) > timeout)
            .map(|s| s.id)
            .collect();

        for id in &expired {
            if let Some(mut session) = self.sessions.remove(id) {
                session.deactivate();
                info!(
                    session_id = %id,
                    idle_secs = session.idle_for(now).as_secs(),
                    "Evicted session"
                );
            }
            if self.current == Some(*id) {
                self.current = None;
            }
        }

        expired
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of one session; never updates its activity time
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionSnapshot> {
        let now = self.clock.now();
        self.sessions.get(&id).map(|s| s.snapshot(now))
    }

    /// Whether the id names a stored session
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// All stored ids, in no particular order
    #[must_use]
    pub fn list_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Snapshots of every session
    #[must_use]
    pub fn snapshot_all(&self) -> HashMap<SessionId, SessionSnapshot> {
        let now = self.clock.now();
        self.sessions
            .iter()
            .map(|(id, s)| (*id, s.snapshot(now)))
            .collect()
    }

    /// The current session, if it is still live and active
    #[must_use]
    pub fn get_current(&self) -> Option<SessionId> {
        self.current
            .filter(|id| self.sessions.get(id).is_some_and(Session::is_active))
    }

    /// Make a session current
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for unknown ids, [`SessionError::Inactive`]
    /// for ended sessions.
    pub fn set_current(&mut self, id: SessionId) -> SessionResult<()> {
        let now = self.clock.now();
        let session = self.active_session_mut(id)?;
        session.touch(now);
        self.current = Some(id);
        debug!(session_id = %id, "Current session set");
        Ok(())
    }

    // ========================================================================
    // Mutations used by the manager
    // ========================================================================

    /// Change the model of a session
    ///
    /// If no turn is in flight, the turn slot is taken so nothing else can
    /// write to the sink until [`finish_notice`](Self::finish_notice).
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] or [`SessionError::Inactive`].
    pub fn switch_model(&mut self, id: SessionId, model: &str) -> SessionResult<ModelSwitch> {
        let now = self.clock.now();
        let session = self.active_session_mut(id)?;
        session.touch(now);
        let previous = std::mem::replace(&mut session.model, model.to_string());

        let reserved = !session.is_busy();
        if reserved {
            session.turn = Some(CancellationToken::new());
        }

        Ok(ModelSwitch {
            sink: session.sink,
            previous,
            reserved,
        })
    }

    /// Release the slot taken by [`switch_model`](Self::switch_model);
    /// no-op if the session is gone
    pub fn finish_notice(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.turn = None;
        }
    }

    /// Mark a turn as started
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`], [`SessionError::Inactive`], or
    /// [`SessionError::Busy`] if a turn is already in flight.
    pub fn begin_turn(&mut self, id: SessionId) -> SessionResult<TurnTicket> {
        let now = self.clock.now();
        let session = self.active_session_mut(id)?;
        if session.is_busy() {
            return Err(SessionError::Busy(id));
        }

        let cancel = CancellationToken::new();
        session.turn = Some(cancel.clone());
        session.touch(now);

        Ok(TurnTicket {
            session_id: id,
            model: session.model.clone(),
            sink: session.sink,
            active: session.active.clone(),
            cancel,
        })
    }

    /// Mark a turn as finished; no-op if the session is gone
    pub fn finish_turn(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            if session.turn.take().is_some() {
                session.turns += 1;
            }
        }
    }

    /// Append an assistant message to a session's history
    ///
    /// Returns false if the session is gone or ended.
    pub fn append_history(&mut self, id: SessionId, message: AssistantMessage) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if session.is_active() => {
                session.history.push(message);
                true
            }
            _ => false,
        }
    }

    fn active_session_mut(&mut self, id: SessionId) -> SessionResult<&mut Session> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;
        if !session.is_active() {
            return Err(SessionError::Inactive(id));
        }
        Ok(session)
    }
}
