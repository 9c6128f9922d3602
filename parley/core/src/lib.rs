//! Parley Core - Concurrent Conversational Sessions over a Streaming Service
//!
//! This crate manages several concurrent conversations with a streaming
//! text-generation service (the `claude` CLI by default), each rendering
//! incrementally into its own display sink. It has no opinion about what
//! the sink is: an editor buffer, a terminal pane, or a JSON-lines pipe.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SessionManager                           │
//! │   create / send / switch_model / end / query                     │
//! │                                                                  │
//! │  ┌──────────────────┐          ┌──────────────────────────────┐  │
//! │  │   SessionStore   │◄─────────┤  Turn (one per send)         │  │
//! │  │  capacity, idle  │ history  │  Idle → Sending ⇄ Flushing   │  │
//! │  │  eviction,       │          │       → Terminated           │  │
//! │  │  current id      │          │  ┌──────────────┐            │  │
//! │  └──────────────────┘          │  │ FlushBuffer  │──► Sink    │  │
//! │                                │  └──────────────┘            │  │
//! │                                └──────────────▲───────────────┘  │
//! └───────────────────────────────────────────────┼──────────────────┘
//!                                                 │ StreamItem (mpsc)
//!                                      ┌──────────┴──────────┐
//!                                      │  GenerationService  │
//!                                      │ (claude CLI, script)│
//!                                      └─────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`SessionManager`]: the façade; every public operation goes through it
//! - [`SessionStore`]: sessions, capacity, idle-timeout eviction
//! - [`Turn`]: per-send state machine consuming one event sequence
//! - [`FlushBuffer`]: batches text lines into time-bounded sink writes
//! - [`GenerationService`]: event source trait; [`ClaudeCliBackend`] and
//!   [`ScriptedService`] implement it
//! - [`Sink`]: display surface trait; [`RecordingSink`] records in memory
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_core::{ClaudeCliBackend, RecordingSink, SessionManager, SinkHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(RecordingSink::new());
//!     let manager = SessionManager::new(Arc::new(ClaudeCliBackend::default()), sink.clone());
//!
//!     let id = manager.create_session(SinkHandle(1), None)?;
//!     manager.send(id, "Hello!").await?;
//!
//!     for line in sink.rendered(SinkHandle(1)) {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::time::Duration;

pub mod backend;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod flush;
pub mod manager;
pub mod sanitize;
pub mod session;
pub mod sink;
pub mod store;

// Re-export main types
pub use backend::{
    AssistantMessage, ClaudeCliBackend, ClaudeCliConfig, GenerationRequest, GenerationService,
    Script, ScriptedService, StreamItem, StreamMessage, Usage,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, ParleyConfig,
};
pub use consumer::{Turn, TurnContext, TurnOutcome, TurnReport, TurnState};
pub use error::{SessionError, SessionResult, StreamFailure};
pub use flush::{split_lines, FlushBuffer};
pub use manager::{ManagerSettings, SessionManager};
pub use sanitize::{sanitize, REDACTION_MARKER};
pub use session::{ActiveFlag, SessionId, SessionSnapshot, SessionStatus};
pub use sink::{RecordingSink, Sink, SinkError, SinkHandle, SinkOp};
pub use store::SessionStore;

/// Default store capacity
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default idle time after which a session is evicted
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default flush buffer interval
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Model for sessions created without one
pub const DEFAULT_MODEL: &str = "sonnet";

/// Agentic turn limit passed to the generation service
pub const DEFAULT_MAX_TURNS: u32 = 3;
