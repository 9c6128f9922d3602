//! JSON-Lines Wire Protocol
//!
//! One JSON object per line in each direction.
//!
//! Requests (stdin):
//!
//! ```text
//! {"id": 1, "method": "startSession", "params": {"buffer": 3, "model": "opus"}}
//! {"id": 2, "method": "sendMessage", "params": {"sessionId": "...", "prompt": "Hi"}}
//! ```
//!
//! Responses and notifications (stdout):
//!
//! ```text
//! {"id": 1, "ok": true, "result": "..."}
//! {"id": 2, "ok": false, "error": {"kind": "busy", "message": "..."}}
//! {"event": "appendLines", "buffer": 3, "lines": ["", "Claude is thinking..."]}
//! {"event": "overwriteLastLine", "buffer": 3, "line": "Claude:"}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use parley_core::{sanitize, SessionError, SessionId, SinkHandle, SinkOp, TurnOutcome, TurnReport, Usage};

/// Error kind for malformed requests
pub const BAD_REQUEST: &str = "badRequest";

/// Errors decoding a request line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line is not a request object
    #[error("invalid request: {0}")]
    InvalidJson(String),

    /// Method name not recognised
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    /// Params missing or of the wrong shape
    #[error("invalid params for `{method}`: {message}")]
    InvalidParams {
        /// Method being called
        method: String,
        /// Decoder message
        message: String,
    },

    /// Same id as a request still being served
    #[error("request id {0} is already in flight")]
    DuplicateId(u64),
}

// =============================================================================
// Requests
// =============================================================================

/// Envelope as read off the wire
#[derive(Debug, Deserialize)]
struct RawRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct StartSessionParams {
    buffer: SinkHandle,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageParams {
    session_id: SessionId,
    prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchModelParams {
    session_id: SessionId,
    model: String,
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlates the response
    pub id: u64,
    /// What to do
    pub command: Command,
}

/// Dispatcher operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a session rendering into `buffer`
    StartSession {
        /// Sink handle of the new session
        buffer: SinkHandle,
        /// Model, or the configured default
        model: Option<String>,
    },
    /// Stream a reply to `prompt`
    SendMessage {
        /// Target session
        session_id: SessionId,
        /// Prompt text
        prompt: String,
    },
    /// End a session
    EndSession {
        /// Target session
        session_id: SessionId,
    },
    /// All session ids
    ListSessions,
    /// One session snapshot
    GetSessionInfo {
        /// Target session
        session_id: SessionId,
    },
    /// Same as `GetSessionInfo`
    GetSession {
        /// Target session
        session_id: SessionId,
    },
    /// Every session snapshot
    GetAllSessions,
    /// Current session id
    GetCurrentSession,
    /// Make a session current
    SetCurrentSession {
        /// Target session
        session_id: SessionId,
    },
    /// Change a session's model
    SwitchModel {
        /// Target session
        session_id: SessionId,
        /// New model
        model: String,
    },
}

impl Request {
    /// Decode one request line
    ///
    /// On failure, returns the request id too when it could be read, so the
    /// error response can still be correlated.
    pub fn parse(line: &str) -> Result<Self, (Option<u64>, ProtocolError)> {
        let raw: RawRequest = serde_json::from_str(line).map_err(|e| {
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_u64));
            (id, ProtocolError::InvalidJson(e.to_string()))
        })?;

        let id = raw.id;
        Command::from_parts(&raw.method, raw.params)
            .map(|command| Self { id, command })
            .map_err(|e| (Some(id), e))
    }
}

impl Command {
    fn from_parts(method: &str, params: Value) -> Result<Self, ProtocolError> {
        let command = match method {
            "startSession" => {
                let p: StartSessionParams = decode(method, params)?;
                Self::StartSession {
                    buffer: p.buffer,
                    model: p.model,
                }
            }
            "sendMessage" => {
                let p: SendMessageParams = decode(method, params)?;
                Self::SendMessage {
                    session_id: p.session_id,
                    prompt: p.prompt,
                }
            }
            "endSession" => Self::EndSession {
                session_id: decode::<SessionParams>(method, params)?.session_id,
            },
            "listSessions" => Self::ListSessions,
            "getSessionInfo" => Self::GetSessionInfo {
                session_id: decode::<SessionParams>(method, params)?.session_id,
            },
            "getSession" => Self::GetSession {
                session_id: decode::<SessionParams>(method, params)?.session_id,
            },
            "getAllSessions" => Self::GetAllSessions,
            "getCurrentSession" => Self::GetCurrentSession,
            "setCurrentSession" => Self::SetCurrentSession {
                session_id: decode::<SessionParams>(method, params)?.session_id,
            },
            "switchModel" => {
                let p: SwitchModelParams = decode(method, params)?;
                Self::SwitchModel {
                    session_id: p.session_id,
                    model: p.model,
                }
            }
            other => return Err(ProtocolError::UnknownMethod(other.to_string())),
        };
        Ok(command)
    }

    /// Wire name of the method
    pub fn method(&self) -> &'static str {
        match self {
            Self::StartSession { .. } => "startSession",
            Self::SendMessage { .. } => "sendMessage",
            Self::EndSession { .. } => "endSession",
            Self::ListSessions => "listSessions",
            Self::GetSessionInfo { .. } => "getSessionInfo",
            Self::GetSession { .. } => "getSession",
            Self::GetAllSessions => "getAllSessions",
            Self::GetCurrentSession => "getCurrentSession",
            Self::SetCurrentSession { .. } => "setCurrentSession",
            Self::SwitchModel { .. } => "switchModel",
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

// =============================================================================
// Responses
// =============================================================================

/// Error payload of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Machine-readable kind
    pub kind: String,
    /// Human-readable, sanitized message
    pub message: String,
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Request id, `null` if the request could not be read
    pub id: Option<u64>,
    /// Whether the request succeeded
    pub ok: bool,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful reply
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply; the message is sanitized
    pub fn failure(id: Option<u64>, kind: &str, message: &str) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: sanitize(message),
            }),
        }
    }

    /// Reply for a façade error
    pub fn session_error(id: u64, err: &SessionError) -> Self {
        Self::failure(Some(id), err.kind(), &err.to_string())
    }

    /// Reply for an undecodable request
    pub fn bad_request(id: Option<u64>, err: &ProtocolError) -> Self {
        Self::failure(id, BAD_REQUEST, &err.to_string())
    }
}

/// Result payload of `sendMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    /// `completed`, `failed` or `cancelled`
    pub outcome: &'static str,
    /// Sanitized failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Token usage, if reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Assistant events consumed
    pub assistant_events: usize,
}

impl From<TurnReport> for TurnSummary {
    fn from(report: TurnReport) -> Self {
        let (outcome, error) = match report.outcome {
            TurnOutcome::Completed => ("completed", None),
            TurnOutcome::Failed(message) => ("failed", Some(message)),
            TurnOutcome::Cancelled => ("cancelled", None),
        };
        Self {
            outcome,
            error,
            usage: report.usage,
            assistant_events: report.assistant_events,
        }
    }
}

/// Anything written to stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Reply to a request
    Response(Response),
    /// Sink operation
    Notification(SinkOp),
}
