use castor_schema::exchange::{RelayEvent, StopKind, TurnUsage};
use castor_schema::openai::{
    ChatCompletionChunk, ChunkDelta, FunctionCallDelta, ToolCallDelta, chunk,
};

use crate::meter::estimate_tokens;

/// Renders relay events into Chat Completions stream chunks
/// (`data: {...}\n\n`, terminated by `data: [DONE]` at the transport).
pub struct OpenaiFramer {
    id: String,
    created: i64,
    model: String,
    input_estimate: u64,
    started: bool,
    tool_index: Option<usize>,
    output_chars: u64,
    usage: TurnUsage,
    finish: Option<StopKind>,
}

impl OpenaiFramer {
    pub fn new(id: String, created: i64, model: String, input_estimate: u64) -> Self {
        Self {
            id,
            created,
            model,
            input_estimate,
            started: false,
            tool_index: None,
            output_chars: 0,
            usage: TurnUsage::default(),
            finish: None,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        chunk(&self.id, self.created, &self.model, delta, finish_reason)
    }

    fn role_chunk(&mut self, out: &mut Vec<ChatCompletionChunk>) {
        if !self.started {
            self.started = true;
            out.push(self.chunk(
                ChunkDelta {
                    role: Some("assistant".to_string()),
                    ..ChunkDelta::default()
                },
                None,
            ));
        }
    }

    pub fn on_event(&mut self, event: RelayEvent) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        match event {
            RelayEvent::Start { model } => {
                if !model.is_empty() {
                    self.model = model;
                }
                self.role_chunk(&mut out);
            }
            RelayEvent::TextDelta(text) => {
                self.role_chunk(&mut out);
                self.output_chars += text.chars().count() as u64;
                out.push(self.chunk(
                    ChunkDelta {
                        content: Some(text),
                        ..ChunkDelta::default()
                    },
                    None,
                ));
            }
            RelayEvent::ThinkingDelta(reasoning) => {
                self.role_chunk(&mut out);
                self.output_chars += reasoning.chars().count() as u64;
                out.push(self.chunk(
                    ChunkDelta {
                        reasoning_content: Some(reasoning),
                        ..ChunkDelta::default()
                    },
                    None,
                ));
            }
            // No slot for signatures in the Chat Completions grammar.
            RelayEvent::ThinkingSignature(_) => {}
            RelayEvent::ToolUseStart { id, name } => {
                self.role_chunk(&mut out);
                let index = self.tool_index.map_or(0, |i| i + 1);
                self.tool_index = Some(index);
                out.push(self.chunk(
                    ChunkDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: FunctionCallDelta {
                                name: Some(name),
                                arguments: Some(String::new()),
                            },
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                ));
            }
            RelayEvent::ToolUseInputDelta(arguments) => {
                if let Some(index) = self.tool_index {
                    self.output_chars += arguments.chars().count() as u64;
                    out.push(self.chunk(
                        ChunkDelta {
                            tool_calls: Some(vec![ToolCallDelta {
                                index,
                                id: None,
                                kind: None,
                                function: FunctionCallDelta {
                                    name: None,
                                    arguments: Some(arguments),
                                },
                            }]),
                            ..ChunkDelta::default()
                        },
                        None,
                    ));
                }
            }
            RelayEvent::ToolUseStop => {}
            RelayEvent::Finish { stop, usage } => {
                self.role_chunk(&mut out);
                self.usage = usage;
                self.finish = Some(stop);
                out.push(self.chunk(ChunkDelta::default(), Some(stop.openai_name())));
            }
        }
        out
    }

    pub fn finished(&self) -> bool {
        self.finish.is_some()
    }

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

    #[test]
    fn first_chunk_carries_assistant_role() {
        let mut framer = OpenaiFramer::new("chatcmpl-1".to_string(), 0, "gpt-x".to_string(), 0);
        let chunks = framer.on_event(RelayEvent::TextDelta("hi".to_string()));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn tool_calls_carry_stable_indices() {
        let mut framer = OpenaiFramer::new("chatcmpl-2".to_string(), 0, "gpt-x".to_string(), 0);
        framer.on_event(RelayEvent::ToolUseStart {
            id: "call_1".to_string(),
            name: "a".to_string(),
        });
        framer.on_event(RelayEvent::ToolUseInputDelta("{}".to_string()));
        let second = framer.on_event(RelayEvent::ToolUseStart {
            id: "call_2".to_string(),
            name: "b".to_string(),
        });
        let calls = second[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_2"));
    }

    #[test]
    fn finish_maps_tool_use_to_tool_calls_reason() {
        let mut framer = OpenaiFramer::new("chatcmpl-3".to_string(), 0, "gpt-x".to_string(), 0);
        let chunks = framer.on_event(RelayEvent::Finish {
            stop: StopKind::ToolUse,
            usage: TurnUsage::default(),
        });
        let last = chunks.last().unwrap();
        assert_eq!(
            last.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
        assert!(framer.finished());
    }
}
