use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClaudeContentBlock, ClaudeUsage, MessagesResponse};

/// Server-sent events of the Anthropic Messages stream grammar.
///
/// Serialized when the gateway emits a Claude-dialect stream; deserialized
/// when the upstream itself speaks this grammar (Anthropic passthrough).
/// The tag doubles as the SSE `event:` line; see
/// [`ClaudeStreamEvent::event_name`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: MessagesResponse,
    },
    ContentBlockStart {
        index: usize,
        content_block: ClaudeContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ClaudeDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: StreamUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
}

impl ClaudeStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClaudeStreamEvent::MessageStart { .. } => "message_start",
            ClaudeStreamEvent::ContentBlockStart { .. } => "content_block_start",
            ClaudeStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            ClaudeStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            ClaudeStreamEvent::MessageDelta { .. } => "message_delta",
            ClaudeStreamEvent::MessageStop => "message_stop",
            ClaudeStreamEvent::Ping => "ping",
            ClaudeStreamEvent::Error { .. } => "error",
        }
    }

    /// Opening `message_start` payload for a fresh stream.
    pub fn message_start(id: String, model: String, input_tokens: u64) -> Self {
        ClaudeStreamEvent::MessageStart {
            message: MessagesResponse {
                id,
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model,
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: ClaudeUsage {
                    input_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Final usage carried by `message_delta`; only `output_tokens` is required
/// by the grammar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamUsage {
    #[serde(default)]
    pub output_tokens: u64,
}
