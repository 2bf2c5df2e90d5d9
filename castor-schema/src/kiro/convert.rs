use serde_json::{Value, json};

use super::{
    AssistantResponseMessage, AssistantResponseRequest, ConversationState, KiroInputSchema,
    KiroMessage, KiroTool, KiroToolResult, KiroToolSpec, KiroToolUse, UserInputMessage,
    UserInputMessageContext,
};
use crate::exchange::{Exchange, MessagePart, Role};

const CHAT_TRIGGER_MANUAL: &str = "MANUAL";
const ORIGIN_AI_EDITOR: &str = "AI_EDITOR";

fn tool_decls(ex: &Exchange) -> Option<Vec<KiroTool>> {
    if ex.tools.is_empty() {
        return None;
    }
    Some(
        ex.tools
            .iter()
            .map(|t| KiroTool {
                tool_specification: KiroToolSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: KiroInputSchema {
                        json: if t.input_schema.is_null() {
                            json!({"type": "object"})
                        } else {
                            t.input_schema.clone()
                        },
                    },
                },
            })
            .collect(),
    )
}

fn user_message(ex: &Exchange, parts: &[MessagePart], content_prefix: Option<&str>) -> KiroMessage {
    let mut content = content_prefix.map(str::to_string).unwrap_or_default();
    let mut tool_results: Vec<KiroToolResult> = Vec::new();

    for part in parts {
        match part {
            MessagePart::Text { text } => content.push_str(text),
            MessagePart::ToolResult {
                tool_use_id,
                content: result,
                is_error,
            } => {
                let entry = match result {
                    Value::String(s) => json!({ "text": s }),
                    other => json!({ "json": other }),
                };
                tool_results.push(KiroToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: vec![entry],
                    status: if *is_error { "error" } else { "success" }.to_string(),
                });
            }
            // Thinking and tool-use parts never appear in a user turn.
            MessagePart::Thinking { .. } | MessagePart::ToolUse { .. } => {}
        }
    }

    // The upstream rejects empty user content on tool continuations.
    if content.is_empty() {
        content.push_str("Tool results attached.");
    }

    let context = UserInputMessageContext {
        tool_results: (!tool_results.is_empty()).then_some(tool_results),
        tools: tool_decls(ex),
    };

    KiroMessage {
        user_input_message: Some(UserInputMessage {
            content,
            model_id: ex.model.clone(),
            origin: ORIGIN_AI_EDITOR.to_string(),
            user_input_message_context: Some(context),
        }),
        assistant_response_message: None,
    }
}

fn assistant_message(parts: &[MessagePart]) -> KiroMessage {
    let mut content = String::new();
    let mut tool_uses: Vec<KiroToolUse> = Vec::new();

    for part in parts {
        match part {
            MessagePart::Text { text } => content.push_str(text),
            MessagePart::ToolUse { id, name, input } => tool_uses.push(KiroToolUse {
                tool_use_id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            // CodeWhisperer history has no slot for reasoning text.
            MessagePart::Thinking { .. } | MessagePart::ToolResult { .. } => {}
        }
    }

    KiroMessage {
        user_input_message: None,
        assistant_response_message: Some(AssistantResponseMessage {
            content,
            tool_uses: (!tool_uses.is_empty()).then_some(tool_uses),
        }),
    }
}

/// Build the CodeWhisperer request for a normalized exchange.
///
/// The system prompt has no dedicated slot upstream and is prefixed onto the
/// first user turn. History must alternate user/assistant; the final message
/// becomes `currentMessage`.
pub fn build_assistant_request(
    ex: &Exchange,
    conversation_id: String,
    profile_arn: Option<String>,
) -> AssistantResponseRequest {
    let system_prefix = ex.system.as_ref().map(|s| format!("{s}\n\n"));
    let mut first_user_seen = false;

    let mut rendered: Vec<KiroMessage> = Vec::new();
    for msg in &ex.messages {
        match msg.role {
            Role::User => {
                let prefix = if first_user_seen {
                    None
                } else {
                    first_user_seen = true;
                    system_prefix.as_deref()
                };
                rendered.push(user_message(ex, &msg.parts, prefix));
            }
            Role::Assistant => rendered.push(assistant_message(&msg.parts)),
        }
    }

    let current_message = rendered.pop().unwrap_or_else(|| {
        user_message(ex, &[], system_prefix.as_deref())
    });

    AssistantResponseRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
            conversation_id,
            current_message,
            history: rendered,
        },
        profile_arn,
    }
}
