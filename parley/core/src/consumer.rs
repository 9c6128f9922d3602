//! Stream Consumer
//!
//! Drives one turn of one session: writes the thinking notice, opens the
//! event sequence, routes assistant text through a [`FlushBuffer`] into the
//! sink, renders the usage notice, and closes the turn with a separator.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Sending ◄──► Flushing
//!             │
//!             ├──► Terminated(Completed)   sequence ended or `result` seen
//!             ├──► Terminated(Failed)      stream or sink failure, rendered
//!             └──► Terminated(Cancelled)   session ended mid-turn, no writes
//! ```
//!
//! # Sink transcript of a completed turn
//!
//! ```text
//! append    ["", "Claude is thinking..."]
//! overwrite "Claude:"                        first assistant event
//! append    [text lines...]                  batched by the flush buffer
//! append    ["", "[Tokens used: I input, O output]"]   if usage present
//! append    ["", "---", ""]
//! ```
//!
//! A failed turn ends with `append ["Error: <msg>", ""]`, where the message
//! has been through [`sanitize`]. If the last line is still the thinking
//! notice or the bare `Claude:` header it is first blanked with
//! `overwrite ""`; otherwise a blank line is appended before the error so
//! delivered text is never overwritten.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::{
    AssistantMessage, GenerationRequest, GenerationService, ResultEvent, StreamMessage, Usage,
};
use crate::clock::SharedClock;
use crate::error::StreamFailure;
use crate::flush::{split_lines, FlushBuffer};
use crate::sanitize::sanitize;
use crate::sink::{Sink, SinkError};
use crate::store::{SessionStore, TurnTicket};

/// Shown while waiting for the first assistant event
pub const THINKING_NOTICE: &str = "Claude is thinking...";

/// Replaces the thinking notice once output starts
pub const RESPONSE_HEADER: &str = "Claude:";

/// Prefix of the rendered error line
pub const ERROR_PREFIX: &str = "Error: ";

/// Lines written at the end of a completed turn
pub const TURN_SEPARATOR: [&str; 3] = ["", "---", ""];

// ============================================================================
// States
// ============================================================================

/// How a turn ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Sequence ended normally
    Completed,
    /// Stream or sink failure, rendered into the sink (sanitized message)
    Failed(String),
    /// Session ended while the turn was running
    Cancelled,
}

/// Turn state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnState {
    /// Not started
    Idle,
    /// Consuming events
    Sending,
    /// Delivering a batch to the sink
    Flushing,
    /// Finished
    Terminated(TurnOutcome),
}

/// Summary of a finished turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    /// How the turn ended
    pub outcome: TurnOutcome,
    /// Assistant events consumed
    pub assistant_events: usize,
    /// Batches delivered by the flush buffer
    pub flushes: usize,
    /// Usage from the `result` event
    pub usage: Option<Usage>,
}

// ============================================================================
// Turn
// ============================================================================

/// Collaborators shared by every turn
#[derive(Clone)]
pub struct TurnContext {
    /// Event source
    pub service: Arc<dyn GenerationService>,
    /// Display surface
    pub sink: Arc<dyn Sink>,
    /// Session store, for history appends
    pub store: Arc<Mutex<SessionStore>>,
    /// Time source for flush throttling
    pub clock: SharedClock,
    /// Flush buffer interval
    pub flush_interval: Duration,
    /// Turn limit passed to the service
    pub max_turns: u32,
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("service", &self.service.name())
            .field("flush_interval", &self.flush_interval)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

/// Why `drive` stopped early
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Stream(StreamFailure),
    Sink(SinkError),
}

impl From<StreamFailure> for Interrupt {
    fn from(failure: StreamFailure) -> Self {
        Self::Stream(failure)
    }
}

impl From<SinkError> for Interrupt {
    fn from(err: SinkError) -> Self {
        Self::Sink(err)
    }
}

/// One send-prompt-to-final-response cycle
pub struct Turn {
    ctx: TurnContext,
    ticket: TurnTicket,
    prompt: String,
    buffer: FlushBuffer,
    state: TurnState,
    started_response: bool,
    placeholder_last: bool,
    assistant_events: usize,
    usage: Option<Usage>,
}

impl Turn {
    /// Prepare a turn for the session named by `ticket`
    #[must_use]
    pub fn new(ctx: &TurnContext, ticket: TurnTicket, prompt: impl Into<String>) -> Self {
        Self {
            buffer: FlushBuffer::new(ctx.flush_interval, Arc::clone(&ctx.clock)),
            ctx: ctx.clone(),
            ticket,
            prompt: prompt.into(),
            state: TurnState::Idle,
            started_response: false,
            placeholder_last: false,
            assistant_events: 0,
            usage: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Run the turn to completion
    ///
    /// Never fails: stream and sink failures are rendered into the sink
    /// and reported in the returned [`TurnReport`].
    pub async fn run(&mut self) -> TurnReport {
        self.transition(TurnState::Sending);

        let outcome = match self.drive().await {
            Ok(()) => TurnOutcome::Completed,
            Err(Interrupt::Cancelled) => TurnOutcome::Cancelled,
            Err(Interrupt::Stream(failure)) => self.fail(&failure.to_string()).await,
            Err(Interrupt::Sink(err)) => self.fail(&err.to_string()).await,
        };

        debug!(
            session_id = %self.ticket.session_id,
            outcome = ?outcome,
            assistant_events = self.assistant_events,
            flushes = self.buffer.flushes(),
            "Turn finished"
        );
        self.transition(TurnState::Terminated(outcome.clone()));

        TurnReport {
            outcome,
            assistant_events: self.assistant_events,
            flushes: self.buffer.flushes(),
            usage: self.usage.clone(),
        }
    }

    async fn drive(&mut self) -> Result<(), Interrupt> {
        self.ensure_active()?;
        self.ctx
            .sink
            .append_lines(
                self.ticket.sink,
                &[String::new(), THINKING_NOTICE.to_string()],
            )
            .await?;
        self.placeholder_last = true;

        let request = GenerationRequest::new(self.prompt.clone(), self.ticket.model.clone())
            .with_max_turns(self.ctx.max_turns)
            .with_cancel(self.ticket.cancel.clone());
        let mut events = self.ctx.service.stream(&request).await?;

        loop {
            let item = tokio::select! {
                biased;
                () = self.ticket.cancel.cancelled() => return Err(Interrupt::Cancelled),
                item = events.recv() => item,
            };

            match item {
                None => break,
                Some(Err(failure)) => return Err(failure.into()),
                Some(Ok(StreamMessage::Assistant(event))) => {
                    self.on_assistant(event.message).await?;
                }
                Some(Ok(StreamMessage::Result(result))) => {
                    self.on_result(result).await?;
                    break;
                }
                Some(Ok(other)) => {
                    trace!(session_id = %self.ticket.session_id, kind = other.kind(), "Skipped stream event");
                }
            }
        }
        drop(events);

        self.flush(true).await?;
        self.ensure_active()?;
        self.ctx
            .sink
            .append_lines(self.ticket.sink, &lines(&TURN_SEPARATOR))
            .await?;
        self.placeholder_last = false;
        Ok(())
    }

    async fn on_assistant(&mut self, message: AssistantMessage) -> Result<(), Interrupt> {
        self.ensure_active()?;
        self.assistant_events += 1;

        if !self.started_response {
            self.ctx
                .sink
                .overwrite_last_line(self.ticket.sink, RESPONSE_HEADER)
                .await?;
            self.started_response = true;
        }

        for fragment in message.text_fragments() {
            self.buffer.offer(split_lines(fragment));
            self.flush(false).await?;
        }

        self.ensure_active()?;
        if !self
            .ctx
            .store
            .lock()
            .append_history(self.ticket.session_id, message)
        {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    async fn on_result(&mut self, result: ResultEvent) -> Result<(), Interrupt> {
        debug!(
            session_id = %self.ticket.session_id,
            subtype = ?result.subtype,
            is_error = ?result.is_error,
            num_turns = ?result.num_turns,
            duration_ms = ?result.duration_ms,
            "Result received"
        );

        self.flush(true).await?;

        if let Some(usage) = result.usage {
            self.ensure_active()?;
            self.ctx
                .sink
                .append_lines(self.ticket.sink, &[String::new(), usage.notice()])
                .await?;
            self.placeholder_last = false;
            self.usage = Some(usage);
        }
        Ok(())
    }

    /// Render a failure; returns the outcome to report
    async fn fail(&mut self, message: &str) -> TurnOutcome {
        let message = sanitize(message);
        warn!(
            session_id = %self.ticket.session_id,
            error = %message,
            "Turn failed"
        );

        match self.render_failure(&message).await {
            Ok(()) => TurnOutcome::Failed(message),
            Err(Interrupt::Cancelled) => TurnOutcome::Cancelled,
            Err(err) => {
                warn!(
                    session_id = %self.ticket.session_id,
                    error = ?err,
                    "Could not render turn failure"
                );
                TurnOutcome::Failed(message)
            }
        }
    }

    async fn render_failure(&mut self, message: &str) -> Result<(), Interrupt> {
        self.flush(true).await?;
        self.ensure_active()?;

        let error_line = format!("{ERROR_PREFIX}{message}");
        let error_lines = if self.placeholder_last {
            self.ctx
                .sink
                .overwrite_last_line(self.ticket.sink, "")
                .await?;
            vec![error_line, String::new()]
        } else {
            vec![String::new(), error_line, String::new()]
        };
        self.ctx
            .sink
            .append_lines(self.ticket.sink, &error_lines)
            .await?;
        self.placeholder_last = false;
        Ok(())
    }

    async fn flush(&mut self, force: bool) -> Result<(), Interrupt> {
        if !self.buffer.is_due(force) {
            return Ok(());
        }
        self.ensure_active()?;

        self.transition(TurnState::Flushing);
        let result = self
            .buffer
            .maybe_flush(self.ctx.sink.as_ref(), self.ticket.sink, force)
            .await;
        self.transition(TurnState::Sending);
        if result? {
            self.placeholder_last = false;
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), Interrupt> {
        if self.ticket.active.is_active() {
            Ok(())
        } else {
            Err(Interrupt::Cancelled)
        }
    }

    fn transition(&mut self, next: TurnState) {
        trace!(
            session_id = %self.ticket.session_id,
            from = ?self.state,
            to = ?next,
            "Turn state"
        );
        self.state = next;
    }
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
