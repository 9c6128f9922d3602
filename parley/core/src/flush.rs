//! Flush Buffer
//!
//! Assistant text arrives as many small fragments. Writing each one to the
//! sink would be slow and flickery, so fragments are split into lines and
//! collected here, then delivered as one batch when the flush interval has
//! elapsed or a flush is forced.
//!
//! Every offered line is delivered exactly once, in offer order. A failed
//! delivery keeps the lines pending.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::SharedClock;
use crate::sink::{Sink, SinkError, SinkHandle};

/// Split a text fragment into lines
///
/// Only the empty tail produced by a trailing line break is dropped;
/// interior blank lines are kept.
///
/// ```
/// use parley_core::flush::split_lines;
///
/// assert_eq!(split_lines("x\ny\n"), vec!["x", "y"]);
/// assert_eq!(split_lines("x\n\ny"), vec!["x", "", "y"]);
/// assert!(split_lines("").is_empty());
/// ```
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Time-bounded line batcher for one turn
#[derive(Debug)]
pub struct FlushBuffer {
    pending: Vec<String>,
    last_flush: Instant,
    interval: Duration,
    flushes: usize,
    clock: SharedClock,
}

impl FlushBuffer {
    /// Create an empty buffer; the interval starts counting now
    #[must_use]
    pub fn new(interval: Duration, clock: SharedClock) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: clock.now(),
            interval,
            flushes: 0,
            clock,
        }
    }

    /// Queue lines for delivery
    pub fn offer<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.pending.extend(lines);
    }

    /// Lines not yet delivered
    #[must_use]
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Number of successful deliveries so far
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Whether a flush would happen now
    #[must_use]
    pub fn is_due(&self, force: bool) -> bool {
        !self.pending.is_empty()
            && (force
                || self.clock.now().saturating_duration_since(self.last_flush) >= self.interval)
    }

    /// Deliver all pending lines as one batch if due
    ///
    /// Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; pending lines are kept in that case.
    pub async fn maybe_flush(
        &mut self,
        sink: &dyn Sink,
        handle: SinkHandle,
        force: bool,
    ) -> Result<bool, SinkError> {
        if !self.is_due(force) {
            return Ok(false);
        }

        sink.append_lines(handle, &self.pending).await?;

        debug!(
            sink = %handle,
            lines = self.pending.len(),
            forced = force,
            "Flushed buffered lines"
        );
        self.pending.clear();
        self.last_flush = self.clock.now();
        self.flushes += 1;
        Ok(true)
    }
}
