mod convert;

pub use convert::build_assistant_request;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CodeWhisperer `generateAssistantResponse` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseRequest {
    pub conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub chat_trigger_type: String,
    pub conversation_id: String,
    pub current_message: KiroMessage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<KiroMessage>,
}

/// Either side of the alternating CodeWhisperer history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message: Option<UserInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response_message: Option<AssistantResponseMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<UserInputMessageContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<KiroToolResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<KiroTool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolResult {
    pub tool_use_id: String,
    pub content: Vec<Value>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroTool {
    pub tool_specification: KiroToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: KiroInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroInputSchema {
    pub json: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_uses: Option<Vec<KiroToolUse>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

/// One JSON frame extracted from the CodeWhisperer response byte stream.
///
/// Frames are flat objects; which fields are present determines the event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroFrame {
    pub content: Option<String>,
    pub tool_use_id: Option<String>,
    pub name: Option<String>,
    pub input: Option<String>,
    pub stop: Option<bool>,
    pub conversation_id: Option<String>,
    pub followup_prompt: Option<Value>,
    pub message: Option<String>,
}

/// Classified CodeWhisperer stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum KiroStreamEvent {
    /// Assistant text fragment.
    Text(String),
    /// Tool-use fragment; `input` accumulates across frames until `stop`.
    ToolUse {
        id: String,
        name: String,
        input: Option<String>,
        stop: bool,
    },
    /// Metadata or other frames with no client-visible payload.
    Ignored,
}

impl KiroFrame {
    pub fn classify(self) -> KiroStreamEvent {
        if let Some(id) = self.tool_use_id {
            return KiroStreamEvent::ToolUse {
                id,
                name: self.name.unwrap_or_default(),
                input: self.input,
                stop: self.stop.unwrap_or(false),
            };
        }
        match self.content {
            Some(content) if !content.is_empty() => KiroStreamEvent::Text(content),
            _ => KiroStreamEvent::Ignored,
        }
    }
}

/// CodeWhisperer `getUsageLimits` response (observable subset).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimitsResponse {
    #[serde(default)]
    pub usage_breakdown_list: Vec<UsageBreakdown>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBreakdown {
    pub resource_type: Option<String>,
    pub usage_limit: Option<f64>,
    pub current_usage: Option<f64>,
    /// Epoch seconds of the next window reset, when reported.
    pub next_date_reset: Option<f64>,
}

impl UsageBreakdown {
    /// Remaining fraction in `[0, 1]`, when both numbers are present.
    pub fn remaining_fraction(&self) -> Option<f64> {
        let limit = self.usage_limit?;
        if limit <= 0.0 {
            return None;
        }
        let used = self.current_usage.unwrap_or(0.0);
        Some(((limit - used) / limit).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_with_tool_use_id_classifies_as_tool_use() {
        let frame: KiroFrame = serde_json::from_value(json!({
            "toolUseId": "t1", "name": "get_weather", "input": "{\"ci", "stop": false
        }))
        .unwrap();
        assert_eq!(
            frame.classify(),
            KiroStreamEvent::ToolUse {
                id: "t1".to_string(),
                name: "get_weather".to_string(),
                input: Some("{\"ci".to_string()),
                stop: false,
            }
        );
    }

    #[test]
    fn content_frame_classifies_as_text() {
        let frame: KiroFrame = serde_json::from_value(json!({"content": "hello"})).unwrap();
        assert_eq!(frame.classify(), KiroStreamEvent::Text("hello".to_string()));
    }

    #[test]
    fn metadata_frame_is_ignored() {
        let frame: KiroFrame =
            serde_json::from_value(json!({"conversationId": "c-1"})).unwrap();
        assert_eq!(frame.classify(), KiroStreamEvent::Ignored);
    }

    #[test]
    fn remaining_fraction_clamps_and_handles_missing_limit() {
        let full = UsageBreakdown {
            resource_type: None,
            usage_limit: Some(100.0),
            current_usage: Some(25.0),
            next_date_reset: None,
        };
        assert_eq!(full.remaining_fraction(), Some(0.75));

        let unknown = UsageBreakdown::default();
        assert_eq!(unknown.remaining_fraction(), None);
    }
}
