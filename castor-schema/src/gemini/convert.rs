use serde_json::{Value, json};
use std::collections::HashMap;

use super::{
    GeminiCandidate, GeminiContent, GeminiFunctionCall, GeminiFunctionDecl,
    GeminiFunctionResponse, GeminiPart, GeminiToolDecl, GeminiUsageMetadata,
    GenerateContentRequest, GenerationConfig,
};
use crate::exchange::{Exchange, MessagePart, RelayEvent, Role, StopKind, TurnUsage};

impl From<&Exchange> for GenerateContentRequest {
    fn from(ex: &Exchange) -> Self {
        // Gemini function responses are keyed by name, not call id; recover
        // the name from the matching tool_use earlier in the conversation.
        let mut call_names: HashMap<&str, &str> = HashMap::new();
        for msg in &ex.messages {
            for part in &msg.parts {
                if let MessagePart::ToolUse { id, name, .. } = part {
                    call_names.insert(id.as_str(), name.as_str());
                }
            }
        }

        let contents = ex
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                let parts = msg
                    .parts
                    .iter()
                    .map(|part| match part {
                        MessagePart::Text { text } => GeminiPart::from_text(text.clone()),
                        MessagePart::Thinking { text, signature } => GeminiPart {
                            thought: Some(true),
                            thought_signature: signature.clone(),
                            text: Some(text.clone()),
                            ..GeminiPart::default()
                        },
                        MessagePart::ToolUse { id, name, input } => GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                id: Some(id.clone()),
                                name: name.clone(),
                                args: input.clone(),
                            }),
                            ..GeminiPart::default()
                        },
                        MessagePart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                id: Some(tool_use_id.clone()),
                                name: call_names
                                    .get(tool_use_id.as_str())
                                    .map_or_else(|| tool_use_id.clone(), ToString::to_string),
                                response: json!({ "result": content }),
                            }),
                            ..GeminiPart::default()
                        },
                    })
                    .collect();

                GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                }
            })
            .collect();

        let system_instruction = ex.system.as_ref().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::from_text(text.clone())],
        });

        let tools = (!ex.tools.is_empty()).then(|| {
            vec![GeminiToolDecl {
                function_declarations: ex
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDecl {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: (!t.input_schema.is_null())
                            .then(|| t.input_schema.clone()),
                    })
                    .collect(),
            }]
        });

        let thinking_config = ex.thinking.map(|directive| {
            json!({
                "includeThoughts": true,
                "thinkingBudget": directive.budget_tokens,
            })
        });

        let generation_config = GenerationConfig {
            max_output_tokens: ex.max_tokens,
            temperature: ex.temperature,
            top_p: ex.top_p,
            stop_sequences: (!ex.stop_sequences.is_empty()).then(|| ex.stop_sequences.clone()),
            thinking_config,
            ..GenerationConfig::default()
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            tool_config: None,
            generation_config: Some(generation_config),
            ..GenerateContentRequest::default()
        }
    }
}

/// Translate one streamed Gemini part into relay events.
pub fn part_events(part: &GeminiPart) -> Vec<RelayEvent> {
    let mut events = Vec::new();

    if let Some(call) = &part.function_call {
        let id = call
            .id
            .clone()
            .unwrap_or_else(|| format!("toolu_{}", call.name));
        events.push(RelayEvent::ToolUseStart {
            id,
            name: call.name.clone(),
        });
        events.push(RelayEvent::ToolUseInputDelta(call.args.to_string()));
        events.push(RelayEvent::ToolUseStop);
        return events;
    }

    if let Some(text) = &part.text {
        if part.thought.unwrap_or(false) {
            events.push(RelayEvent::ThinkingDelta(text.clone()));
            if let Some(sig) = &part.thought_signature {
                events.push(RelayEvent::ThinkingSignature(sig.clone()));
            }
        } else if !text.is_empty() {
            events.push(RelayEvent::TextDelta(text.clone()));
        }
    } else if let Some(sig) = &part.thought_signature {
        events.push(RelayEvent::ThinkingSignature(sig.clone()));
    }

    events
}

pub fn stop_kind(candidate: &GeminiCandidate, saw_tool_use: bool) -> StopKind {
    match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => StopKind::MaxTokens,
        Some("STOP") if saw_tool_use => StopKind::ToolUse,
        _ if saw_tool_use => StopKind::ToolUse,
        _ => StopKind::EndTurn,
    }
}

impl From<GeminiUsageMetadata> for TurnUsage {
    fn from(meta: GeminiUsageMetadata) -> Self {
        TurnUsage {
            input_tokens: meta.prompt_token_count,
            output_tokens: meta.candidates_token_count + meta.thoughts_token_count,
            cache_write_tokens: 0,
            cache_read_tokens: meta.cached_content_token_count,
        }
    }
}
