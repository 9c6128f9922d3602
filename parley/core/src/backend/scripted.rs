//! Scripted Generation Service
//!
//! Replays canned event sequences, one [`Script`] per call to `stream`.
//! Every request is recorded so callers can check what was sent.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::events::{StreamItem, StreamMessage};
use super::traits::{GenerationRequest, GenerationService, STREAM_CHANNEL_CAPACITY};
use crate::error::StreamFailure;

/// What one call to `stream` produces
#[derive(Debug, Clone)]
pub struct Script {
    items: Vec<StreamItem>,
    open_error: Option<StreamFailure>,
    gate: Option<Arc<Notify>>,
    hold_open: bool,
}

impl Script {
    /// Yield these items in order, then close
    #[must_use]
    pub fn items(items: Vec<StreamItem>) -> Self {
        Self {
            items,
            open_error: None,
            gate: None,
            hold_open: false,
        }
    }

    /// A plain reply: one assistant text event, then a result with usage
    #[must_use]
    pub fn reply(text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        Self::items(vec![
            Ok(StreamMessage::assistant_text(text)),
            Ok(StreamMessage::result_with_usage(input_tokens, output_tokens)),
        ])
    }

    /// Fail to open the stream at all
    #[must_use]
    pub fn open_failure(failure: StreamFailure) -> Self {
        Self {
            open_error: Some(failure),
            ..Self::items(Vec::new())
        }
    }

    /// Wait for `gate` to be notified before yielding anything
    #[must_use]
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Keep the stream open after the last item until cancelled or dropped
    #[must_use]
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// A request as seen by [`ScriptedService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Prompt text
    pub prompt: String,
    /// Model used
    pub model: String,
    /// Turn limit passed through
    pub max_turns: u32,
}

/// In-memory [`GenerationService`] driven by scripts
#[derive(Debug, Default)]
pub struct ScriptedService {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Option<Script>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedService {
    /// Service that plays `scripts` in order, one per call
    #[must_use]
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script used once the queue is empty
    #[must_use]
    pub fn with_fallback(mut self, script: Script) -> Self {
        self.fallback = Some(script);
        self
    }

    /// Queue another script
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Every request received so far
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn next_script(&self) -> Option<Script> {
        self.scripts
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamItem>, StreamFailure> {
        self.requests.lock().push(RecordedRequest {
            prompt: request.prompt.clone(),
            model: request.model.clone(),
            max_turns: request.max_turns,
        });

        let script = self
            .next_script()
            .ok_or_else(|| StreamFailure::Spawn("no scripted response left".to_string()))?;
        if let Some(failure) = script.open_error {
            return Err(failure);
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = request.cancel.clone();

        tokio::spawn(async move {
            if let Some(gate) = script.gate {
                tokio::select! {
                    () = gate.notified() => {}
                    () = cancel.cancelled() => return,
                }
            }

            for item in script.items {
                // One event per scheduler tick, like a real stream
                tokio::task::yield_now().await;
                if cancel.is_cancelled() || tx.send(item).await.is_err() {
                    return;
                }
            }

            if script.hold_open {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tx.closed() => {}
                }
            }
        });

        Ok(rx)
    }
}
