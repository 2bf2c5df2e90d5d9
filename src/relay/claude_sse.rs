use serde_json::{Map, Value, json};

use castor_schema::claude::{
    ClaudeContentBlock, ClaudeDelta, ClaudeStreamEvent, MessageDeltaBody, StreamUsage,
};
use castor_schema::exchange::{RelayEvent, StopKind, TurnUsage};

use crate::meter::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool,
}

/// Renders relay events into the Anthropic Messages SSE grammar:
/// `message_start`, `content_block_start`, `content_block_delta`
/// (`text_delta` / `thinking_delta` / `input_json_delta`),
/// `content_block_stop`, `message_delta`, `message_stop`.
///
/// Pure state machine; the transport layer turns the returned events into
/// `event:`/`data:` lines. Token counters update per delta; the final
/// `message_delta` carries `output_tokens` (reported, or estimated when the
/// upstream does not count).
pub struct ClaudeFramer {
    msg_id: String,
    model: String,
    input_estimate: u64,
    started: bool,
    index: usize,
    open: Option<OpenBlock>,
    output_chars: u64,
    usage: TurnUsage,
    finish: Option<StopKind>,
}

impl ClaudeFramer {
    pub fn new(msg_id: String, model: String, input_estimate: u64) -> Self {
        Self {
            msg_id,
            model,
            input_estimate,
            started: false,
            index: 0,
            open: None,
            output_chars: 0,
            usage: TurnUsage::default(),
            finish: None,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        if !self.started {
            self.started = true;
            out.push(ClaudeStreamEvent::message_start(
                self.msg_id.clone(),
                self.model.clone(),
                self.input_estimate,
            ));
        }
    }

    fn close_block(&mut self, out: &mut Vec<ClaudeStreamEvent>) {
        if self.open.take().is_some() {
            out.push(ClaudeStreamEvent::ContentBlockStop { index: self.index });
            self.index += 1;
        }
    }

    fn open_block(&mut self, kind: OpenBlock, block: ClaudeContentBlock, out: &mut Vec<ClaudeStreamEvent>) {
        if self.open == Some(kind) {
            return;
        }
        self.close_block(out);
        out.push(ClaudeStreamEvent::ContentBlockStart {
            index: self.index,
            content_block: block,
        });
        self.open = Some(kind);
    }

    pub fn on_event(&mut self, event: RelayEvent) -> Vec<ClaudeStreamEvent> {
        let mut out = Vec::new();
        match event {
            RelayEvent::Start { model } => {
                if !model.is_empty() {
                    self.model = model;
                }
                self.ensure_started(&mut out);
            }
            RelayEvent::TextDelta(text) => {
                self.ensure_started(&mut out);
                self.open_block(
                    OpenBlock::Text,
                    ClaudeContentBlock::Text {
                        text: String::new(),
                    },
                    &mut out,
                );
                self.output_chars += text.chars().count() as u64;
                out.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: self.index,
                    delta: ClaudeDelta::TextDelta { text },
                });
            }
            RelayEvent::ThinkingDelta(thinking) => {
                self.ensure_started(&mut out);
                self.open_block(
                    OpenBlock::Thinking,
                    ClaudeContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    &mut out,
                );
                self.output_chars += thinking.chars().count() as u64;
                out.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: self.index,
                    delta: ClaudeDelta::ThinkingDelta { thinking },
                });
            }
            RelayEvent::ThinkingSignature(signature) => {
                if self.open == Some(OpenBlock::Thinking) {
                    out.push(ClaudeStreamEvent::ContentBlockDelta {
                        index: self.index,
                        delta: ClaudeDelta::SignatureDelta { signature },
                    });
                }
            }
            RelayEvent::ToolUseStart { id, name } => {
                self.ensure_started(&mut out);
                self.close_block(&mut out);
                out.push(ClaudeStreamEvent::ContentBlockStart {
                    index: self.index,
                    content_block: ClaudeContentBlock::ToolUse {
                        id,
                        name,
                        input: Value::Object(Map::new()),
                    },
                });
                self.open = Some(OpenBlock::Tool);
            }
            RelayEvent::ToolUseInputDelta(partial_json) => {
                if self.open == Some(OpenBlock::Tool) {
                    self.output_chars += partial_json.chars().count() as u64;
                    out.push(ClaudeStreamEvent::ContentBlockDelta {
                        index: self.index,
                        delta: ClaudeDelta::InputJsonDelta { partial_json },
                    });
                }
            }
            RelayEvent::ToolUseStop => {
                if self.open == Some(OpenBlock::Tool) {
                    self.close_block(&mut out);
                }
            }
            RelayEvent::Finish { stop, usage } => {
                self.ensure_started(&mut out);
                self.close_block(&mut out);
                self.usage = usage;
                self.finish = Some(stop);
                out.push(ClaudeStreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: Some(stop.claude_name().to_string()),
                        stop_sequence: None,
                    },
                    usage: StreamUsage {
                        output_tokens: self.final_usage().output_tokens,
                    },
                });
                out.push(ClaudeStreamEvent::MessageStop);
            }
        }
        out
    }

    /// Mid-stream failure: emit the dialect's `error` event and stop.
    /// Headers are long gone; the transport just closes after this.
    pub fn on_error(&mut self, kind: &str, message: &str) -> Vec<ClaudeStreamEvent> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_block(&mut out);
        out.push(ClaudeStreamEvent::Error {
            error: json!({ "type": kind, "message": message }),
        });
        out
    }

    pub fn finished(&self) -> bool {
        self.finish.is_some()
    }

    /// Usage with estimates substituted for anything the upstream did not
    /// report.
    pub fn final_usage(&self) -> TurnUsage {
        let mut usage = self.usage;
        if usage.input_tokens == 0 {
            usage.input_tokens = self.input_estimate;
        }
        if usage.output_tokens == 0 {
            usage.output_tokens = estimate_tokens(self.output_chars);
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(events: &[ClaudeStreamEvent]) -> Vec<&'static str> {
        events.iter().map(ClaudeStreamEvent::event_name).collect()
    }

    #[test]
    fn text_stream_produces_anthropic_event_sequence() {
        let mut framer = ClaudeFramer::new("msg_1".to_string(), "claude-x".to_string(), 12);
        let mut all = Vec::new();
        all.extend(framer.on_event(RelayEvent::TextDelta("Hel".to_string())));
        all.extend(framer.on_event(RelayEvent::TextDelta("lo".to_string())));
        all.extend(framer.on_event(RelayEvent::Finish {
            stop: StopKind::EndTurn,
            usage: TurnUsage {
                input_tokens: 12,
                output_tokens: 2,
                ..TurnUsage::default()
            },
        }));

        assert_eq!(
            names(&all),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(framer.finished());
    }

    #[test]
    fn thinking_block_opens_before_first_text_block() {
        let mut framer = ClaudeFramer::new("msg_2".to_string(), "claude-x".to_string(), 0);
        let mut all = Vec::new();
        all.extend(framer.on_event(RelayEvent::ThinkingDelta("mull".to_string())));
        all.extend(framer.on_event(RelayEvent::ThinkingSignature("sig".to_string())));
        all.extend(framer.on_event(RelayEvent::TextDelta("answer".to_string())));

        let thinking_start = all
            .iter()
            .position(|e| {
                matches!(
                    e,
                    ClaudeStreamEvent::ContentBlockStart {
                        content_block: ClaudeContentBlock::Thinking { .. },
                        ..
                    }
                )
            })
            .unwrap();
        let text_start = all
            .iter()
            .position(|e| {
                matches!(
                    e,
                    ClaudeStreamEvent::ContentBlockStart {
                        content_block: ClaudeContentBlock::Text { .. },
                        ..
                    }
                )
            })
            .unwrap();
        assert!(thinking_start < text_start);

        // Block indices advance across the thinking -> text transition.
        if let ClaudeStreamEvent::ContentBlockStart { index, .. } = &all[text_start] {
            assert_eq!(*index, 1);
        }
    }

    #[test]
    fn tool_use_deltas_are_input_json() {
        let mut framer = ClaudeFramer::new("msg_3".to_string(), "claude-x".to_string(), 0);
        framer.on_event(RelayEvent::TextDelta("calling".to_string()));
        let events = framer.on_event(RelayEvent::ToolUseStart {
            id: "toolu_1".to_string(),
            name: "get_weather".to_string(),
        });
        // Closes the text block, then opens the tool block.
        assert_eq!(names(&events), vec!["content_block_stop", "content_block_start"]);

        let delta = framer.on_event(RelayEvent::ToolUseInputDelta("{\"q\":1}".to_string()));
        assert!(matches!(
            &delta[0],
            ClaudeStreamEvent::ContentBlockDelta {
                delta: ClaudeDelta::InputJsonDelta { .. },
                ..
            }
        ));
    }

    #[test]
    fn unreported_output_tokens_are_estimated_from_chars() {
        let mut framer = ClaudeFramer::new("msg_4".to_string(), "claude-x".to_string(), 7);
        framer.on_event(RelayEvent::TextDelta("a".repeat(40)));
        framer.on_event(RelayEvent::Finish {
            stop: StopKind::EndTurn,
            usage: TurnUsage::default(),
        });
        let usage = framer.final_usage();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 10);
    }

    #[test]
    fn error_event_closes_open_block_first() {
        let mut framer = ClaudeFramer::new("msg_5".to_string(), "claude-x".to_string(), 0);
        framer.on_event(RelayEvent::TextDelta("part".to_string()));
        let events = framer.on_error("api_error", "upstream went away");
        assert_eq!(names(&events), vec!["content_block_stop", "error"]);
    }
}
