//! Generation Service Integration
//!
//! Abstracted access to the service that produces assistant output, through
//! the [`GenerationService`] trait.
//!
//! # Available Backends
//!
//! - **Claude CLI**: spawns `claude -p ... --output-format stream-json`
//! - **Scripted**: replays canned events (tests, demos)
//!
//! # Usage
//!
//! ```ignore
//! use parley_core::backend::{ClaudeCliBackend, GenerationRequest, GenerationService};
//!
//! let backend = ClaudeCliBackend::default();
//! let mut rx = backend.stream(&GenerationRequest::new("Hello!", "sonnet")).await?;
//! while let Some(item) = rx.recv().await { /* ... */ }
//! ```

mod claude_cli;
mod events;
mod scripted;
mod traits;

pub use claude_cli::{ClaudeCliBackend, ClaudeCliConfig};
pub use events::{
    parse_line, AssistantEvent, AssistantMessage, ContentBlock, ResultEvent, StreamItem,
    StreamMessage, SystemEvent, Usage,
};
pub use scripted::{RecordedRequest, Script, ScriptedService};
pub use traits::{GenerationRequest, GenerationService, STREAM_CHANNEL_CAPACITY};
