//! Sink writing notifications to the outbound JSON-lines stream

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_core::{Sink, SinkError, SinkHandle, SinkOp};

use crate::protocol::Outbound;

/// Forwards every sink operation to the stdout writer as a notification
///
/// The editor on the other end owns the buffers; a handle it never
/// registered is just a number here.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    tx: mpsc::Sender<Outbound>,
}

impl JsonLinesSink {
    /// Sink feeding `tx`
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    async fn emit(&self, op: SinkOp) -> Result<(), SinkError> {
        let handle = op.handle();
        self.tx
            .send(Outbound::Notification(op))
            .await
            .map_err(|_| SinkError::Closed(handle))
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn append_lines(&self, handle: SinkHandle, lines: &[String]) -> Result<(), SinkError> {
        self.emit(SinkOp::AppendLines {
            buffer: handle,
            lines: lines.to_vec(),
        })
        .await
    }

    async fn overwrite_last_line(&self, handle: SinkHandle, line: &str) -> Result<(), SinkError> {
        self.emit(SinkOp::OverwriteLastLine {
            buffer: handle,
            line: line.to_string(),
        })
        .await
    }
}
