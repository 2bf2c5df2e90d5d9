pub mod claude;
pub mod exchange;
pub mod gemini;
pub mod kiro;
pub mod openai;

pub use claude::{ClaudeContentBlock, ClaudeMessage, MessagesRequest, MessagesResponse};
pub use exchange::{ChatMessage, CompletedTurn, Exchange, MessagePart, RelayEvent, Role, StopKind};
pub use gemini::{GeminiContent, GeminiPart, GenerateContentRequest, GenerateContentResponse};
pub use kiro::{AssistantResponseRequest, KiroStreamEvent};
pub use openai::{ChatCompletionsRequest, ChatCompletionsResponse, OpenaiMessage};
