use serde_json::Value;

use super::{
    ClaudeContent, ClaudeContentBlock, ClaudeMessage, ClaudeThinking, MessagesRequest,
    MessagesResponse, SystemPrompt,
};
use crate::exchange::{
    ChatMessage, CompletedTurn, Exchange, MessagePart, Role, ThinkingDirective, ToolSpec,
};

impl SystemPrompt {
    /// Collapse into one plain-text system prompt.
    fn collapse(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    if let ClaudeContentBlock::Text { text } = block {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

fn block_to_part(block: ClaudeContentBlock) -> Option<MessagePart> {
    match block {
        ClaudeContentBlock::Text { text } => Some(MessagePart::Text { text }),
        ClaudeContentBlock::Thinking {
            thinking,
            signature,
        } => Some(MessagePart::Thinking {
            text: thinking,
            signature,
        }),
        ClaudeContentBlock::ToolUse { id, name, input } => {
            Some(MessagePart::ToolUse { id, name, input })
        }
        ClaudeContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(MessagePart::ToolResult {
            tool_use_id,
            content: content.unwrap_or(Value::Null),
            is_error: is_error.unwrap_or(false),
        }),
        // Redacted thinking and images carry no translatable payload for
        // non-Anthropic upstreams; they are dropped here and preserved only
        // on the passthrough path.
        ClaudeContentBlock::RedactedThinking { .. } | ClaudeContentBlock::Image { .. } => None,
    }
}

fn message_parts(content: ClaudeContent) -> Vec<MessagePart> {
    match content {
        ClaudeContent::Text(text) => vec![MessagePart::Text { text }],
        ClaudeContent::Blocks(blocks) => blocks.into_iter().filter_map(block_to_part).collect(),
    }
}

impl From<MessagesRequest> for Exchange {
    fn from(req: MessagesRequest) -> Self {
        let system = req.system.as_ref().map(SystemPrompt::collapse).filter(|s| !s.is_empty());

        let messages = req
            .messages
            .into_iter()
            .map(|ClaudeMessage { role, content }| {
                let role = if role == "assistant" {
                    Role::Assistant
                } else {
                    Role::User
                };
                ChatMessage {
                    role,
                    parts: message_parts(content),
                }
            })
            .filter(|m| !m.parts.is_empty())
            .collect();

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();

        let thinking = match req.thinking {
            Some(ClaudeThinking::Enabled { budget_tokens }) => {
                Some(ThinkingDirective { budget_tokens })
            }
            _ => None,
        };

        let session_hint = req
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Exchange {
            model: req.model,
            system,
            messages,
            tools,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences.unwrap_or_default(),
            stream: req.stream.unwrap_or(false),
            thinking,
            session_hint,
        }
    }
}

impl From<&Exchange> for MessagesRequest {
    /// Egress rendering for Anthropic-dialect upstreams.
    fn from(ex: &Exchange) -> Self {
        let messages = ex
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let blocks = msg
                    .parts
                    .iter()
                    .map(|part| match part.clone() {
                        MessagePart::Text { text } => ClaudeContentBlock::Text { text },
                        MessagePart::Thinking { text, signature } => ClaudeContentBlock::Thinking {
                            thinking: text,
                            signature,
                        },
                        MessagePart::ToolUse { id, name, input } => {
                            ClaudeContentBlock::ToolUse { id, name, input }
                        }
                        MessagePart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => ClaudeContentBlock::ToolResult {
                            tool_use_id,
                            content: (!content.is_null()).then_some(content),
                            is_error: is_error.then_some(true),
                        },
                    })
                    .collect();
                ClaudeMessage {
                    role: role.to_string(),
                    content: ClaudeContent::Blocks(blocks),
                }
            })
            .collect();

        MessagesRequest {
            model: ex.model.clone(),
            max_tokens: ex.max_tokens,
            system: ex.system.clone().map(SystemPrompt::Text),
            messages,
            tools: (!ex.tools.is_empty()).then(|| {
                ex.tools
                    .iter()
                    .map(|t| super::ClaudeTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect()
            }),
            tool_choice: None,
            temperature: ex.temperature,
            top_p: ex.top_p,
            stop_sequences: (!ex.stop_sequences.is_empty()).then(|| ex.stop_sequences.clone()),
            stream: ex.stream.then_some(true),
            thinking: ex.thinking.map(|t| ClaudeThinking::Enabled {
                budget_tokens: t.budget_tokens,
            }),
            metadata: None,
            extra: std::collections::BTreeMap::new(),
        }
    }
}

impl MessagesResponse {
    /// Ingest an upstream (non-streaming) Anthropic response.
    pub fn into_completed_turn(self) -> CompletedTurn {
        use crate::exchange::{StopKind, TurnUsage};

        let parts = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ClaudeContentBlock::Text { text } => Some(MessagePart::Text { text }),
                ClaudeContentBlock::Thinking {
                    thinking,
                    signature,
                } => Some(MessagePart::Thinking {
                    text: thinking,
                    signature,
                }),
                ClaudeContentBlock::ToolUse { id, name, input } => {
                    Some(MessagePart::ToolUse { id, name, input })
                }
                _ => None,
            })
            .collect();

        let stop = match self.stop_reason.as_deref() {
            Some("max_tokens") => Some(StopKind::MaxTokens),
            Some("tool_use") => Some(StopKind::ToolUse),
            Some("stop_sequence") => Some(StopKind::StopSequence),
            Some(_) => Some(StopKind::EndTurn),
            None => None,
        };

        CompletedTurn {
            model: self.model,
            parts,
            stop,
            usage: TurnUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
                cache_write_tokens: self.usage.cache_creation_input_tokens.unwrap_or(0),
                cache_read_tokens: self.usage.cache_read_input_tokens.unwrap_or(0),
            },
        }
    }
}

fn part_to_block(part: MessagePart) -> Option<ClaudeContentBlock> {
    match part {
        MessagePart::Text { text } => Some(ClaudeContentBlock::Text { text }),
        MessagePart::Thinking { text, signature } => Some(ClaudeContentBlock::Thinking {
            thinking: text,
            signature,
        }),
        MessagePart::ToolUse { id, name, input } => {
            Some(ClaudeContentBlock::ToolUse { id, name, input })
        }
        MessagePart::ToolResult { .. } => None,
    }
}

impl CompletedTurn {
    /// Render as an Anthropic Messages response.
    pub fn into_messages_response(self, id: String, fallback_model: &str) -> MessagesResponse {
        let model = if self.model.is_empty() {
            fallback_model.to_string()
        } else {
            self.model
        };

        MessagesResponse {
            id,
            kind: "message".to_string(),
            role: "assistant".to_string(),
            model,
            content: self.parts.into_iter().filter_map(part_to_block).collect(),
            stop_reason: self.stop.map(|s| s.claude_name().to_string()),
            stop_sequence: None,
            usage: self.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{RelayEvent, StopKind, TurnUsage};
    use serde_json::json;

    fn request(body: Value) -> MessagesRequest {
        serde_json::from_value(body).expect("request must parse")
    }

    #[test]
    fn string_system_and_text_messages_normalize() {
        let req = request(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": "be terse",
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": [{"type": "text", "text": "hi"}]}
            ]
        }));

        let ex = Exchange::from(req);
        assert_eq!(ex.system.as_deref(), Some("be terse"));
        assert_eq!(ex.messages.len(), 2);
        assert_eq!(ex.messages[0].role, Role::User);
        assert_eq!(ex.messages[1].text(), "hi");
    }

    #[test]
    fn system_blocks_collapse_with_newlines() {
        let req = request(json!({
            "model": "claude-sonnet-4",
            "system": [
                {"type": "text", "text": "one"},
                {"type": "text", "text": "two"}
            ],
            "messages": [{"role": "user", "content": "x"}]
        }));

        assert_eq!(Exchange::from(req).system.as_deref(), Some("one\ntwo"));
    }

    #[test]
    fn tool_result_content_survives_normalization() {
        let req = request(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Berlin"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "12C"}
                ]}
            ]
        }));

        let ex = Exchange::from(req);
        assert!(ex.is_tool_continuation());
        assert_eq!(
            ex.messages[2].parts[0],
            MessagePart::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: json!("12C"),
                is_error: false,
            }
        );
    }

    #[test]
    fn claude_text_round_trips_byte_for_byte() {
        // Ingress text -> internal -> egress blocks must not alter bytes.
        let payload = "exact \u{00e9}\u{4e16}\n  spacing\tkept";
        let req = request(json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": payload}]
        }));
        let ex = Exchange::from(req);
        assert_eq!(ex.messages[0].text(), payload);

        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::TextDelta(payload.to_string()));
        turn.absorb(RelayEvent::Finish {
            stop: StopKind::EndTurn,
            usage: TurnUsage::default(),
        });
        let resp = turn.into_messages_response("msg_1".to_string(), "claude-sonnet-4");
        assert_eq!(
            resp.content,
            vec![ClaudeContentBlock::Text {
                text: payload.to_string()
            }]
        );
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
    }
}
