//! Display Sinks
//!
//! A sink is the surface rendered text ends up on (an editor buffer, a
//! terminal pane, a notification channel). It offers exactly two
//! primitives:
//!
//! - `append_lines`: add lines after the current last line
//! - `overwrite_last_line`: replace the current last line
//!
//! Each session owns one [`SinkHandle`]; the sink implementation maps the
//! handle to whatever it actually writes to.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque reference to one display destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkHandle(pub u64);

impl fmt::Display for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer:{}", self.0)
    }
}

impl From<u64> for SinkHandle {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Errors from sink writes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Destination no longer accepts writes
    #[error("sink {0} is closed")]
    Closed(SinkHandle),

    /// Underlying write failed
    #[error("sink write failed: {0}")]
    Io(String),
}

/// Display surface receiving rendered lines
#[async_trait]
pub trait Sink: Send + Sync {
    /// Append lines after the current last line, as one batch
    async fn append_lines(&self, handle: SinkHandle, lines: &[String]) -> Result<(), SinkError>;

    /// Replace the current last line
    async fn overwrite_last_line(&self, handle: SinkHandle, line: &str) -> Result<(), SinkError>;
}

/// One sink primitive, as recorded or sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SinkOp {
    /// Batch append
    AppendLines {
        /// Destination
        buffer: SinkHandle,
        /// Lines in order
        lines: Vec<String>,
    },
    /// Last-line replacement
    OverwriteLastLine {
        /// Destination
        buffer: SinkHandle,
        /// Replacement text
        line: String,
    },
}

impl SinkOp {
    /// Destination of this operation
    #[must_use]
    pub fn handle(&self) -> SinkHandle {
        match self {
            Self::AppendLines { buffer, .. } | Self::OverwriteLastLine { buffer, .. } => *buffer,
        }
    }

    /// Apply this operation to an in-memory line model
    pub fn apply(&self, lines: &mut Vec<String>) {
        match self {
            Self::AppendLines { lines: new, .. } => lines.extend(new.iter().cloned()),
            Self::OverwriteLastLine { line, .. } => match lines.last_mut() {
                Some(last) => line.clone_into(last),
                None => lines.push(line.clone()),
            },
        }
    }
}

/// In-memory sink that records every operation
///
/// Handles can be closed to simulate a destination that went away.
#[derive(Debug, Default)]
pub struct RecordingSink {
    ops: Mutex<Vec<SinkOp>>,
    closed: Mutex<HashSet<SinkHandle>>,
}

impl RecordingSink {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation, in the order received
    #[must_use]
    pub fn ops(&self) -> Vec<SinkOp> {
        self.ops.lock().clone()
    }

    /// Operations addressed to one handle
    #[must_use]
    pub fn ops_for(&self, handle: SinkHandle) -> Vec<SinkOp> {
        self.ops
            .lock()
            .iter()
            .filter(|op| op.handle() == handle)
            .cloned()
            .collect()
    }

    /// Final line content of one handle after applying all operations
    #[must_use]
    pub fn rendered(&self, handle: SinkHandle) -> Vec<String> {
        let mut lines = Vec::new();
        for op in self.ops_for(handle) {
            op.apply(&mut lines);
        }
        lines
    }

    /// Reject all further writes to a handle
    pub fn close(&self, handle: SinkHandle) {
        self.closed.lock().insert(handle);
    }

    /// Forget recorded operations
    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    fn record(&self, op: SinkOp) -> Result<(), SinkError> {
        let handle = op.handle();
        if self.closed.lock().contains(&handle) {
            return Err(SinkError::Closed(handle));
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn append_lines(&self, handle: SinkHandle, lines: &[String]) -> Result<(), SinkError> {
        self.record(SinkOp::AppendLines {
            buffer: handle,
            lines: lines.to_vec(),
        })
    }

    async fn overwrite_last_line(&self, handle: SinkHandle, line: &str) -> Result<(), SinkError> {
        self.record(SinkOp::OverwriteLastLine {
            buffer: handle,
            line: line.to_string(),
        })
    }
}
