//! Session Manager
//!
//! The façade external callers use. It owns the [`SessionStore`] behind a
//! single mutex, hands each send to a [`Turn`], and exposes the lifecycle
//! and query operations.
//!
//! The store lock is only ever held for short synchronous sections; it is
//! never held while waiting on the generation service or the sink.
//!
//! # Example
//!
//! ```ignore
//! let manager = SessionManager::new(Arc::new(ClaudeCliBackend::default()), sink);
//! let id = manager.create_session(SinkHandle(1), None)?;
//! manager.send(id, "Explain lifetimes").await?;
//! manager.end_session(id);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::GenerationService;
use crate::clock::{SharedClock, SystemClock};
use crate::consumer::{Turn, TurnContext, TurnReport};
use crate::error::SessionResult;
use crate::session::{SessionId, SessionSnapshot};
use crate::sink::{Sink, SinkHandle};
use crate::store::SessionStore;
use crate::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TURNS, DEFAULT_MODEL,
    DEFAULT_SESSION_TIMEOUT,
};

/// Tunables of a [`SessionManager`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Store capacity
    pub max_sessions: usize,
    /// Idle timeout before eviction
    pub session_timeout: Duration,
    /// Flush buffer interval
    pub flush_interval: Duration,
    /// Turn limit passed to the generation service
    pub max_turns: u32,
    /// Model for sessions created without one
    pub default_model: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_turns: DEFAULT_MAX_TURNS,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Clears the session's busy mark when a send finishes or is dropped
struct TurnGuard {
    store: Arc<Mutex<SessionStore>>,
    id: SessionId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.store.lock().finish_turn(self.id);
    }
}

/// Frees the turn slot held while a model notice is written
struct NoticeGuard {
    store: Arc<Mutex<SessionStore>>,
    id: SessionId,
}

impl Drop for NoticeGuard {
    fn drop(&mut self) {
        self.store.lock().finish_notice(self.id);
    }
}

/// Public entry point for session lifecycle and messaging
///
/// Cheap to clone; clones share the same store.
#[derive(Clone, Debug)]
pub struct SessionManager {
    ctx: TurnContext,
    default_model: String,
}

impl SessionManager {
    /// Manager with default settings and the system clock
    #[must_use]
    pub fn new(service: Arc<dyn GenerationService>, sink: Arc<dyn Sink>) -> Self {
        Self::with_settings(service, sink, ManagerSettings::default(), Arc::new(SystemClock))
    }

    /// Manager with explicit settings and clock
    #[must_use]
    pub fn with_settings(
        service: Arc<dyn GenerationService>,
        sink: Arc<dyn Sink>,
        settings: ManagerSettings,
        clock: SharedClock,
    ) -> Self {
        let store = SessionStore::new(
            settings.max_sessions,
            settings.session_timeout,
            Arc::clone(&clock),
        );
        Self {
            ctx: TurnContext {
                service,
                sink,
                store: Arc::new(Mutex::new(store)),
                clock,
                flush_interval: settings.flush_interval,
                max_turns: settings.max_turns,
            },
            default_model: settings.default_model,
        }
    }

    /// Model used when `create_session` gets none
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Create a session and make it current
    ///
    /// # Errors
    ///
    /// [`SessionError::CapacityExceeded`](crate::SessionError::CapacityExceeded)
    /// if the store is full after eviction.
    pub fn create_session(&self, sink: SinkHandle, model: Option<&str>) -> SessionResult<SessionId> {
        let model = model.unwrap_or(&self.default_model);
        self.ctx.store.lock().create(sink, model)
    }

    /// Send a prompt and stream the reply into the session's sink
    ///
    /// Resolves when the turn is over. Stream failures are rendered into
    /// the sink and reported in the [`TurnReport`], never returned as `Err`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Inactive`, or `Busy` when another send on the same
    /// session has not finished.
    pub async fn send(&self, id: SessionId, prompt: &str) -> SessionResult<TurnReport> {
        let ticket = self.ctx.store.lock().begin_turn(id)?;
        let _guard = TurnGuard {
            store: Arc::clone(&self.ctx.store),
            id,
        };

        debug!(
            session_id = %id,
            model = %ticket.model,
            prompt_len = prompt.len(),
            backend = self.ctx.service.name(),
            "Starting turn"
        );

        let mut turn = Turn::new(&self.ctx, ticket, prompt);
        Ok(turn.run().await)
    }

    /// End a session; unknown ids are ignored
    ///
    /// An in-flight turn on the session is cancelled and writes nothing
    /// further. Returns whether a session was removed.
    pub fn end_session(&self, id: SessionId) -> bool {
        self.ctx.store.lock().end(id)
    }

    /// End every session; returns how many were ended
    pub fn end_all_sessions(&self) -> usize {
        let ended = self.ctx.store.lock().end_all();
        if ended > 0 {
            info!(sessions = ended, "Ended all sessions");
        }
        ended
    }

    /// Ids of all sessions
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.ctx.store.lock().list_ids()
    }

    /// Snapshot of one session
    #[must_use]
    pub fn get_session_info(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.ctx.store.lock().get(id)
    }

    /// Alias of [`get_session_info`](Self::get_session_info)
    #[must_use]
    pub fn get_session(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.get_session_info(id)
    }

    /// Snapshots of every session
    #[must_use]
    pub fn get_all_sessions(&self) -> HashMap<SessionId, SessionSnapshot> {
        self.ctx.store.lock().snapshot_all()
    }

    /// The current session, if any
    #[must_use]
    pub fn current_session(&self) -> Option<SessionId> {
        self.ctx.store.lock().get_current()
    }

    /// Make a session current
    ///
    /// # Errors
    ///
    /// `NotFound` or `Inactive`.
    pub fn set_current_session(&self, id: SessionId) -> SessionResult<()> {
        self.ctx.store.lock().set_current(id)
    }

    /// Change the model used by the session's next turn
    ///
    /// Writes `Switched to model: <model>` to the session's sink unless a
    /// turn is streaming there. While the notice is written the session is
    /// busy, so a concurrent `send` gets `Busy`. A failed notice write is
    /// logged only.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Inactive`.
    pub async fn switch_model(&self, id: SessionId, model: &str) -> SessionResult<()> {
        let switch = self.ctx.store.lock().switch_model(id, model)?;
        info!(
            session_id = %id,
            from = %switch.previous,
            to = %model,
            "Switched model"
        );

        if !switch.reserved {
            debug!(session_id = %id, "Turn in flight, model notice skipped");
            return Ok(());
        }
        let _guard = NoticeGuard {
            store: Arc::clone(&self.ctx.store),
            id,
        };

        let notice = [format!("Switched to model: {model}"), String::new()];
        if let Err(e) = self.ctx.sink.append_lines(switch.sink, &notice).await {
            warn!(session_id = %id, error = %e, "Failed to write model notice");
        }
        Ok(())
    }

    /// Remove idle and inactive sessions now instead of at the next create
    pub fn evict_expired(&self) -> Vec<SessionId> {
        self.ctx.store.lock().evict_expired()
    }
}
