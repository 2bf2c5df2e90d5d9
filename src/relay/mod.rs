mod claude_sse;
mod executor;
mod openai_sse;
mod stream;

pub use claude_sse::ClaudeFramer;
pub use executor::{Dispatched, FailoverExecutor};
pub use openai_sse::OpenaiFramer;
pub use stream::{Monitored, StreamEnd};
