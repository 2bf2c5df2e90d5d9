mod limits;
mod pricing;
mod recorder;

pub use limits::{check_key_ceilings, check_windows};
pub use pricing::{ModelPrice, PricingTable};
pub use recorder::{RequestRecord, UsageMeter};

use castor_schema::exchange::{Exchange, MessagePart};

/// Rough 4-chars-per-token estimate, used when an upstream reports no
/// counts of its own.
pub fn estimate_tokens(chars: u64) -> u64 {
    chars.div_ceil(4)
}

/// Input-token estimate for a normalized request: all message text plus the
/// system prompt.
pub fn estimate_input_tokens(ex: &Exchange) -> u64 {
    let mut chars = ex.system.as_deref().map_or(0, |s| s.chars().count() as u64);
    for msg in &ex.messages {
        for part in &msg.parts {
            chars += match part {
                MessagePart::Text { text } | MessagePart::Thinking { text, .. } => {
                    text.chars().count() as u64
                }
                MessagePart::ToolUse { input, .. } => input.to_string().chars().count() as u64,
                MessagePart::ToolResult { content, .. } => {
                    content.to_string().chars().count() as u64
                }
            };
        }
    }
    estimate_tokens(chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_schema::exchange::ChatMessage;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }

    #[test]
    fn input_estimate_covers_system_and_messages() {
        let ex = Exchange {
            system: Some("abcd".to_string()),
            messages: vec![ChatMessage::user(vec![MessagePart::Text {
                text: "efgh".to_string(),
            }])],
            ..Exchange::default()
        };
        assert_eq!(estimate_input_tokens(&ex), 2);
    }
}
