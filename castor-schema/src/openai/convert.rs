use serde_json::Value;

use super::{
    ChatCompletionChunk, ChatCompletionsRequest, ChatCompletionsResponse, ChunkChoice, ChunkDelta,
    OpenaiChoice, OpenaiContent, OpenaiFunctionCall, OpenaiMessage, OpenaiToolCall, OpenaiUsage,
    StopSpec,
};
use crate::exchange::{ChatMessage, CompletedTurn, Exchange, MessagePart, Role, ToolSpec};

impl From<ChatCompletionsRequest> for Exchange {
    fn from(req: ChatCompletionsRequest) -> Self {
        let mut system = String::new();
        let mut messages: Vec<ChatMessage> = Vec::new();

        for msg in req.messages {
            match msg.role.as_str() {
                // System/developer turns are hoisted into the top-level
                // system prompt, in order of appearance.
                "system" | "developer" => {
                    if let Some(content) = &msg.content {
                        let text = content.flatten_text();
                        if !text.is_empty() {
                            if !system.is_empty() {
                                system.push('\n');
                            }
                            system.push_str(&text);
                        }
                    }
                }
                // A `tool` turn has no role of its own downstream; fold it
                // into a synthetic user turn carrying the tool result.
                "tool" => {
                    let part = MessagePart::ToolResult {
                        tool_use_id: msg.tool_call_id.unwrap_or_default(),
                        content: msg
                            .content
                            .as_ref()
                            .map(|c| Value::String(c.flatten_text()))
                            .unwrap_or(Value::Null),
                        is_error: false,
                    };
                    match messages.last_mut() {
                        Some(last) if last.role == Role::User => last.parts.push(part),
                        _ => messages.push(ChatMessage::user(vec![part])),
                    }
                }
                "assistant" => {
                    let mut parts = Vec::new();
                    if let Some(content) = &msg.content {
                        let text = content.flatten_text();
                        if !text.is_empty() {
                            parts.push(MessagePart::Text { text });
                        }
                    }
                    for call in msg.tool_calls.unwrap_or_default() {
                        let input = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(Value::Object(serde_json::Map::new()));
                        parts.push(MessagePart::ToolUse {
                            id: call.id,
                            name: call.function.name,
                            input,
                        });
                    }
                    if !parts.is_empty() {
                        messages.push(ChatMessage::assistant(parts));
                    }
                }
                _ => {
                    let text = msg
                        .content
                        .as_ref()
                        .map(OpenaiContent::flatten_text)
                        .unwrap_or_default();
                    if !text.is_empty() {
                        messages.push(ChatMessage::user(vec![MessagePart::Text { text }]));
                    }
                }
            }
        }

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolSpec {
                name: t.function.name,
                description: t.function.description,
                input_schema: t.function.parameters.unwrap_or(Value::Null),
            })
            .collect();

        let stop_sequences = match req.stop {
            Some(StopSpec::One(s)) => vec![s],
            Some(StopSpec::Many(v)) => v,
            None => Vec::new(),
        };

        Exchange {
            model: req.model,
            system: (!system.is_empty()).then_some(system),
            messages,
            tools,
            max_tokens: req.max_completion_tokens.or(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences,
            stream: req.stream.unwrap_or(false),
            thinking: None,
            session_hint: req.user,
        }
    }
}

impl CompletedTurn {
    /// Render as an OpenAI Chat Completions response.
    pub fn into_chat_response(
        self,
        id: String,
        created: i64,
        fallback_model: &str,
    ) -> ChatCompletionsResponse {
        let model = if self.model.is_empty() {
            fallback_model.to_string()
        } else {
            self.model
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in self.parts {
            match part {
                MessagePart::Text { text } => content.push_str(&text),
                MessagePart::ToolUse { id, name, input } => {
                    tool_calls.push(OpenaiToolCall {
                        id,
                        kind: "function".to_string(),
                        function: OpenaiFunctionCall {
                            name,
                            arguments: input.to_string(),
                        },
                    });
                }
                // Reasoning text and tool results have no slot in the
                // Chat Completions assistant message.
                MessagePart::Thinking { .. } | MessagePart::ToolResult { .. } => {}
            }
        }

        let usage = OpenaiUsage {
            prompt_tokens: self.usage.input_tokens,
            completion_tokens: self.usage.output_tokens,
            total_tokens: self.usage.input_tokens + self.usage.output_tokens,
        };

        ChatCompletionsResponse {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![OpenaiChoice {
                index: 0,
                message: OpenaiMessage {
                    role: "assistant".to_string(),
                    content: (!content.is_empty()).then_some(OpenaiContent::Text(content)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    name: None,
                },
                finish_reason: self.stop.map(|s| s.openai_name().to_string()),
            }],
            usage,
        }
    }
}

/// Build one stream chunk with the given delta.
pub fn chunk(
    id: &str,
    created: i64,
    model: &str,
    delta: ChunkDelta,
    finish_reason: Option<&str>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish_reason.map(str::to_string),
        }],
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{RelayEvent, StopKind, TurnUsage};
    use serde_json::json;

    fn request(body: serde_json::Value) -> ChatCompletionsRequest {
        serde_json::from_value(body).expect("request must parse")
    }

    #[test]
    fn system_messages_hoist_and_concatenate() {
        let req = request(json!({
            "model": "gpt-test",
            "messages": [
                {"role": "system", "content": "first"},
                {"role": "system", "content": "second"},
                {"role": "user", "content": "hi"}
            ]
        }));

        let ex = Exchange::from(req);
        assert_eq!(ex.system.as_deref(), Some("first\nsecond"));
        assert_eq!(ex.messages.len(), 1);
    }

    #[test]
    fn tool_turn_folds_into_synthetic_user_turn() {
        let req = request(json!({
            "model": "gpt-test",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Berlin\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "12C"}
            ]
        }));

        let ex = Exchange::from(req);
        assert_eq!(ex.messages.len(), 3);
        assert_eq!(ex.messages[1].role, Role::Assistant);
        assert_eq!(
            ex.messages[1].parts[0],
            MessagePart::ToolUse {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Berlin"}),
            }
        );
        assert_eq!(ex.messages[2].role, Role::User);
        assert!(matches!(
            ex.messages[2].parts[0],
            MessagePart::ToolResult { .. }
        ));
    }

    #[test]
    fn tool_use_maps_to_tool_calls_with_identical_name_and_arguments() {
        let mut turn = CompletedTurn::default();
        turn.absorb(RelayEvent::ToolUseStart {
            id: "toolu_9".to_string(),
            name: "get_weather".to_string(),
        });
        turn.absorb(RelayEvent::ToolUseInputDelta(
            "{\"city\":\"Berlin\"}".to_string(),
        ));
        turn.absorb(RelayEvent::ToolUseStop);
        turn.absorb(RelayEvent::Finish {
            stop: StopKind::ToolUse,
            usage: TurnUsage::default(),
        });

        let resp = turn.into_chat_response("chatcmpl-1".to_string(), 0, "gpt-test");
        let choice = &resp.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args, json!({"city": "Berlin"}));
    }
}
