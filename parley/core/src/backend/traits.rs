//! Generation Service Traits
//!
//! A generation service turns one prompt into an ordered, finite sequence
//! of [`StreamItem`]s delivered over a channel. The consumer owns the
//! receiving end; dropping it or firing the request's cancellation token
//! tells the service to stop.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::StreamItem;
use crate::error::StreamFailure;

/// Channel capacity used by the bundled backends
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Parameters for one turn
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Prompt text, sent verbatim
    pub prompt: String,
    /// Model identifier
    pub model: String,
    /// Upper bound on agentic turns the service may take
    pub max_turns: u32,
    /// Fired when the turn should stop early
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    /// Create a request with the default turn limit and a fresh token
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_turns: crate::DEFAULT_MAX_TURNS,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the turn limit
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Use an existing cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Source of streamed assistant output
///
/// Implement this trait to plug in a different transport (CLI process,
/// HTTP API, scripted replay).
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Open the event sequence for one turn
    ///
    /// The returned channel yields events in order and closes when the
    /// turn is over. A failure after opening arrives as an `Err` item.
    ///
    /// # Errors
    ///
    /// Returns [`StreamFailure`] if the sequence cannot be opened at all.
    async fn stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamItem>, StreamFailure>;
}
