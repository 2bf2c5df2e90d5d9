//! Dialect-neutral conversation representation.
//!
//! Every inbound dialect is translated once into an [`Exchange`] on ingress
//! and once back out on egress; provider adapters only touch the wire layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role after normalization.
///
/// System prompts are hoisted out of the message list; tool results ride
/// inside a `User` turn, so two roles are enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One atomic piece of a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn user(parts: Vec<MessagePart>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn assistant(parts: Vec<MessagePart>) -> Self {
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    /// Concatenated plain text of this turn (tool parts excluded).
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A tool made available to the model, independent of wire encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Extended-reasoning directive carried through from the inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingDirective {
    pub budget_tokens: u32,
}

/// The normalized request every provider adapter consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exchange {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingDirective>,
    /// Client-supplied sticky-session hint, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_hint: Option<String>,
}

impl Exchange {
    /// True when the final message is a user turn carrying at least one
    /// tool result, i.e. a tool-use continuation.
    pub fn is_tool_continuation(&self) -> bool {
        self.messages.last().is_some_and(|m| {
            m.role == Role::User
                && m.parts
                    .iter()
                    .any(|p| matches!(p, MessagePart::ToolResult { .. }))
        })
    }
}

/// Why an upstream turn ended, after normalization across dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

impl StopKind {
    pub fn claude_name(self) -> &'static str {
        match self {
            StopKind::EndTurn => "end_turn",
            StopKind::MaxTokens => "max_tokens",
            StopKind::ToolUse => "tool_use",
            StopKind::StopSequence => "stop_sequence",
        }
    }

    pub fn openai_name(self) -> &'static str {
        match self {
            StopKind::EndTurn => "stop",
            StopKind::MaxTokens => "length",
            StopKind::ToolUse => "tool_calls",
            StopKind::StopSequence => "stop",
        }
    }
}

/// Token accounting reported by (or estimated for) one completed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

/// Typed event flowing through a streaming relay channel.
///
/// Producers parse the upstream wire dialect into these; the response writer
/// renders them into the inbound dialect's SSE grammar. Ordering is the
/// channel's FIFO ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Upstream accepted the request; `model` is the upstream's echo if any.
    Start { model: String },
    TextDelta(String),
    ThinkingDelta(String),
    /// Opaque reasoning signature attached to the current thinking block.
    ThinkingSignature(String),
    ToolUseStart { id: String, name: String },
    /// Raw JSON fragment of the current tool call's arguments.
    ToolUseInputDelta(String),
    ToolUseStop,
    Finish { stop: StopKind, usage: TurnUsage },
}

/// Fully-collected model turn, used for non-streaming responses.
#[derive(Debug, Clone, Default)]
pub struct CompletedTurn {
    pub model: String,
    pub parts: Vec<MessagePart>,
    pub stop: Option<StopKind>,
    pub usage: TurnUsage,
}

impl CompletedTurn {
    /// Fold a relay event stream into an assembled turn.
    ///
    /// Deltas for the same block are coalesced; a tool call's input
    /// fragments are concatenated and parsed when the block stops.
    pub fn absorb(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Start { model } => {
                if !model.is_empty() {
                    self.model = model;
                }
            }
            RelayEvent::TextDelta(delta) => {
                if let Some(MessagePart::Text { text }) = self.parts.last_mut() {
                    text.push_str(&delta);
                } else {
                    self.parts.push(MessagePart::Text { text: delta });
                }
            }
            RelayEvent::ThinkingDelta(delta) => {
                if let Some(MessagePart::Thinking { text, .. }) = self.parts.last_mut() {
                    text.push_str(&delta);
                } else {
                    self.parts.push(MessagePart::Thinking {
                        text: delta,
                        signature: None,
                    });
                }
            }
            RelayEvent::ThinkingSignature(sig) => {
                if let Some(MessagePart::Thinking { signature, .. }) = self.parts.last_mut() {
                    *signature = Some(sig);
                }
            }
            RelayEvent::ToolUseStart { id, name } => {
                self.parts.push(MessagePart::ToolUse {
                    id,
                    name,
                    input: Value::String(String::new()),
                });
            }
            RelayEvent::ToolUseInputDelta(fragment) => {
                if let Some(MessagePart::ToolUse {
                    input: Value::String(buf),
                    ..
                }) = self.parts.last_mut()
                {
                    buf.push_str(&fragment);
                }
            }
            RelayEvent::ToolUseStop => {
                if let Some(MessagePart::ToolUse { input, .. }) = self.parts.last_mut() {
                    if let Value::String(buf) = input {
                        *input = serde_json::from_str(buf)
                            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
                    }
                }
            }
            RelayEvent::Finish { stop, usage } => {
                self.stop = Some(stop);
                self.usage = usage;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absorb_coalesces_text_deltas() {
        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::TextDelta("Hello".to_string()));
        turn.absorb(RelayEvent::TextDelta(", world".to_string()));

        assert_eq!(
            turn.parts,
            vec![MessagePart::Text {
                text: "Hello, world".to_string()
            }]
        );
    }

    #[test]
    fn absorb_parses_tool_input_on_stop() {
        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::ToolUseStart {
            id: "toolu_1".to_string(),
            name: "get_weather".to_string(),
        });
        turn.absorb(RelayEvent::ToolUseInputDelta("{\"city\":".to_string()));
        turn.absorb(RelayEvent::ToolUseInputDelta("\"Berlin\"}".to_string()));
        turn.absorb(RelayEvent::ToolUseStop);

        assert_eq!(
            turn.parts,
            vec![MessagePart::ToolUse {
                id: "toolu_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Berlin"}),
            }]
        );
    }

    #[test]
    fn absorb_attaches_signature_to_open_thinking_block() {
        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::ThinkingDelta("considering".to_string()));
        turn.absorb(RelayEvent::ThinkingSignature("sig_abc".to_string()));

        assert_eq!(
            turn.parts,
            vec![MessagePart::Thinking {
                text: "considering".to_string(),
                signature: Some("sig_abc".to_string()),
            }]
        );
    }

    #[test]
    fn malformed_tool_input_degrades_to_empty_object() {
        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::ToolUseStart {
            id: "toolu_2".to_string(),
            name: "search".to_string(),
        });
        turn.absorb(RelayEvent::ToolUseInputDelta("{not json".to_string()));
        turn.absorb(RelayEvent::ToolUseStop);

        assert_eq!(
            turn.parts,
            vec![MessagePart::ToolUse {
                id: "toolu_2".to_string(),
                name: "search".to_string(),
                input: json!({}),
            }]
        );
    }
}
