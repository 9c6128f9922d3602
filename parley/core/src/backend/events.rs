//! Stream-JSON Event Model
//!
//! The generation service emits one JSON object per line, discriminated by
//! `type`:
//!
//! ```text
//! {"type":"system","subtype":"init","session_id":"...","model":"..."}
//! {"type":"assistant","message":{"content":[{"type":"text","text":"Hi"}],"usage":{...}}}
//! {"type":"result","usage":{"input_tokens":15,"output_tokens":8},...}
//! ```
//!
//! Decoding is lenient: every field except an assistant message's
//! `content` is optional, and unknown event types become
//! [`StreamMessage::Other`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StreamFailure;

/// One item of a generation stream
pub type StreamItem = Result<StreamMessage, StreamFailure>;

/// A decoded stream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Initialisation metadata
    System(SystemEvent),
    /// Assistant output, possibly partial
    Assistant(AssistantEvent),
    /// Final event of a turn
    Result(ResultEvent),
    /// Any event type the consumer does not act on
    #[serde(other)]
    Other,
}

impl StreamMessage {
    /// Assistant event carrying the given text as a single block
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant(AssistantEvent {
            message: AssistantMessage::text(text),
            session_id: None,
        })
    }

    /// Result event with token usage
    #[must_use]
    pub fn result_with_usage(input_tokens: u64, output_tokens: u64) -> Self {
        Self::Result(ResultEvent {
            usage: Some(Usage::new(input_tokens, output_tokens)),
            ..ResultEvent::default()
        })
    }

    /// Result event without usage
    #[must_use]
    pub fn result() -> Self {
        Self::Result(ResultEvent::default())
    }

    /// Short name of the event kind, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::Result(_) => "result",
            Self::Other => "other",
        }
    }
}

/// `system` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemEvent {
    /// Event subtype (`init`, ...)
    pub subtype: Option<String>,
    /// Service-side session id
    pub session_id: Option<String>,
    /// Model actually serving the request
    pub model: Option<String>,
}

/// `assistant` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantEvent {
    /// Message body
    pub message: AssistantMessage,
    /// Service-side session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Body of an assistant event; appended to session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Message id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Role, normally `assistant`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Model that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Content blocks in order
    pub content: Vec<ContentBlock>,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Stop sequence hit, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    /// Token usage hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl AssistantMessage {
    /// Message with a single text block
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Some("assistant".to_string()),
            model: None,
            content: vec![ContentBlock::text(text)],
            stop_reason: None,
            stop_sequence: None,
            usage: None,
        }
    }

    /// Text fragments of the `text` blocks, in order
    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(ContentBlock::as_text)
    }
}

/// One content block
///
/// Only `text` blocks render. Other kinds (`tool_use`, `thinking`, ...)
/// are kept with their raw fields so history stays complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Text of a `text` block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    /// A `text` block
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    /// The text, if this is a `text` block
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
    /// Tokens written to the prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    /// Tokens served from the prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    /// Service tier that handled the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

impl Usage {
    /// Plain input/output usage
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// The line rendered after a turn: `[Tokens used: I input, O output]`
    #[must_use]
    pub fn notice(&self) -> String {
        format!(
            "[Tokens used: {} input, {} output]",
            self.input_tokens, self.output_tokens
        )
    }
}

/// `result` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultEvent {
    /// `success`, `error_max_turns`, ...
    pub subtype: Option<String>,
    /// Whether the service considers the turn failed
    pub is_error: Option<bool>,
    /// Agentic turns used
    pub num_turns: Option<u32>,
    /// Wall time of the request
    pub duration_ms: Option<u64>,
    /// Cost reported by the service
    pub total_cost_usd: Option<f64>,
    /// Final result text
    pub result: Option<String>,
    /// Final token usage
    pub usage: Option<Usage>,
    /// Service-side session id
    pub session_id: Option<String>,
}

/// Decode one line of stream-json output
///
/// Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`StreamFailure::Protocol`] if the line is not a valid event.
pub fn parse_line(line: &str) -> Result<Option<StreamMessage>, StreamFailure> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| StreamFailure::Protocol(e.to_string()))
}
