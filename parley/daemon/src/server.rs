//! Daemon Server Implementation
//!
//! The request loop of the Parley daemon:
//! - Reads one JSON request per line from the input
//! - Runs quick operations inline, in arrival order
//! - Spawns a task per `sendMessage` so several sessions stream at once
//! - Funnels responses and sink notifications through one writer task
//! - On input EOF, ends every session and drains in-flight turns
//!
//! ```text
//!   stdin ──► Dispatcher ──► SessionManager ──► Turn tasks
//!                 │                                 │
//!                 │ responses          JsonLinesSink│ notifications
//!                 ▼                                 ▼
//!              mpsc::Sender<Outbound> ──► writer task ──► stdout
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use parley_core::{
    GenerationService, ManagerSettings, SessionError, SessionId, SessionManager, SystemClock,
};

use crate::protocol::{Command, Outbound, ProtocolError, Request, Response, TurnSummary};
use crate::sink::JsonLinesSink;

/// Capacity of the outbound channel feeding the writer
pub const OUTBOUND_CAPACITY: usize = 256;

/// Bookkeeping for a `sendMessage` still streaming
struct InFlightTurn {
    /// Session the turn belongs to
    session_id: SessionId,
    /// When the request was accepted
    started_at: Instant,
}

/// Serve requests from `input` until EOF, writing to `output`
///
/// # Errors
///
/// Fails if the input cannot be read or the output cannot be written.
pub async fn run<R, W>(
    input: R,
    output: W,
    service: Arc<dyn GenerationService>,
    settings: ManagerSettings,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_loop(rx, output));

    let sink = Arc::new(JsonLinesSink::new(tx.clone()));
    let manager = SessionManager::with_settings(service, sink, settings, Arc::new(SystemClock));
    let mut dispatcher = Dispatcher::new(manager, tx);

    info!("Parley daemon ready");

    let mut lines = input.lines();
    let read_result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatcher.handle_line(&line).await;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    info!("Input closed, shutting down");
    dispatcher.shutdown().await;
    drop(dispatcher);

    let write_result = writer.await.context("writer task panicked")?;
    read_result.context("failed to read request")?;
    write_result
}

async fn write_loop<W>(mut rx: mpsc::Receiver<Outbound>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message).context("failed to encode message")?;
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .context("failed to write message")?;
        output.flush().await.context("failed to flush output")?;
    }
    debug!("Writer drained");
    Ok(())
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes decoded requests to the session manager
struct Dispatcher {
    manager: SessionManager,
    outbound: mpsc::Sender<Outbound>,
    in_flight: Arc<DashMap<u64, InFlightTurn>>,
    turns: JoinSet<()>,
}

impl Dispatcher {
    fn new(manager: SessionManager, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            manager,
            outbound,
            in_flight: Arc::new(DashMap::new()),
            turns: JoinSet::new(),
        }
    }

    async fn handle_line(&mut self, line: &str) {
        // Reap finished turn tasks
        while self.turns.try_join_next().is_some() {}

        let request = match Request::parse(line) {
            Ok(request) => request,
            Err((id, e)) => {
                warn!(error = %e, "Rejected request");
                self.respond(Response::bad_request(id, &e)).await;
                return;
            }
        };

        if self.in_flight.contains_key(&request.id) {
            let e = ProtocolError::DuplicateId(request.id);
            warn!(error = %e, "Rejected request");
            self.respond(Response::bad_request(Some(request.id), &e)).await;
            return;
        }

        debug!(id = request.id, method = request.command.method(), "Request");
        let Request { id, command } = request;

        let response = match command {
            Command::SendMessage { session_id, prompt } => {
                self.spawn_turn(id, session_id, prompt);
                return;
            }
            Command::StartSession { buffer, model } => self
                .manager
                .create_session(buffer, model.as_deref())
                .map(|session_id| reply(id, &session_id)),
            Command::EndSession { session_id } => {
                Ok(reply(id, &self.manager.end_session(session_id)))
            }
            Command::ListSessions => Ok(reply(id, &self.manager.list_sessions())),
            Command::GetSessionInfo { session_id } => {
                Ok(reply(id, &self.manager.get_session_info(session_id)))
            }
            Command::GetSession { session_id } => {
                Ok(reply(id, &self.manager.get_session(session_id)))
            }
            Command::GetAllSessions => Ok(reply(id, &self.manager.get_all_sessions())),
            Command::GetCurrentSession => Ok(reply(id, &self.manager.current_session())),
            Command::SetCurrentSession { session_id } => self
                .manager
                .set_current_session(session_id)
                .map(|()| Response::success(id, Value::Null)),
            Command::SwitchModel { session_id, model } => self
                .manager
                .switch_model(session_id, &model)
                .await
                .map(|()| Response::success(id, Value::Null)),
        };

        let response = response.unwrap_or_else(|e| session_failure(id, &e));
        self.respond(response).await;
    }

    fn spawn_turn(&mut self, id: u64, session_id: SessionId, prompt: String) {
        self.in_flight.insert(
            id,
            InFlightTurn {
                session_id,
                started_at: Instant::now(),
            },
        );

        let manager = self.manager.clone();
        let outbound = self.outbound.clone();
        let in_flight = Arc::clone(&self.in_flight);

        self.turns.spawn(async move {
            let response = match manager.send(session_id, &prompt).await {
                Ok(report) => reply(id, &TurnSummary::from(report)),
                Err(e) => session_failure(id, &e),
            };

            if let Some((_, turn)) = in_flight.remove(&id) {
                debug!(
                    id,
                    session_id = %turn.session_id,
                    elapsed_ms = turn.started_at.elapsed().as_millis(),
                    "Turn finished"
                );
            }

            if outbound.send(Outbound::Response(response)).await.is_err() {
                warn!(id, "Writer gone, dropping sendMessage response");
            }
        });
    }

    async fn respond(&self, response: Response) {
        if self.outbound.send(Outbound::Response(response)).await.is_err() {
            warn!("Writer gone, dropping response");
        }
    }

    /// End every session, then wait for the turns they were running
    async fn shutdown(&mut self) {
        let pending = self.in_flight.len();
        let ended = self.manager.end_all_sessions();
        info!(sessions = ended, pending_turns = pending, "Ending all sessions");

        while let Some(joined) = self.turns.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Turn task failed");
            }
        }
    }
}

fn session_failure(id: u64, err: &SessionError) -> Response {
    debug!(id, kind = err.kind(), "Request failed");
    Response::session_error(id, err)
}

fn reply<T: Serialize>(id: u64, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            error!(id, error = %e, "Failed to encode result");
            Response::failure(Some(id), "internal", &e.to_string())
        }
    }
}
