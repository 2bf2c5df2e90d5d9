//! Dialect round-trip laws: content that enters in one dialect, crosses the
//! internal representation to an upstream format, and comes back as relay
//! events must survive unchanged.

use castor_schema::exchange::{CompletedTurn, Exchange, RelayEvent, StopKind, TurnUsage};
use castor_schema::kiro::{KiroFrame, KiroStreamEvent, build_assistant_request};
use castor_schema::{ChatCompletionsRequest, MessagesRequest};
use serde_json::json;

fn claude_request(text: &str) -> MessagesRequest {
    serde_json::from_value(json!({
        "model": "claude-sonnet-4-20250514",
        "max_tokens": 256,
        "messages": [{"role": "user", "content": text}]
    }))
    .expect("request must parse")
}

#[test]
fn claude_text_survives_kiro_round_trip_byte_for_byte() {
    let payload = "greppable \u{00fc}\u{6f22}\t exact\n  bytes";
    let ex = Exchange::from(claude_request(payload));

    // Request direction: the user text lands verbatim in the upstream body.
    let upstream = build_assistant_request(&ex, "conv-1".to_string(), None);
    let sent = upstream
        .conversation_state
        .current_message
        .user_input_message
        .as_ref()
        .unwrap();
    assert_eq!(sent.content, payload);

    // Response direction: upstream frames reassemble into identical bytes.
    let frames = [
        json!({"content": "grep"}),
        json!({"content": "pable \u{00fc}\u{6f22}\t exact\n  bytes"}),
    ];
    let mut turn = CompletedTurn::default();
    for frame in frames {
        let frame: KiroFrame = serde_json::from_value(frame).unwrap();
        if let KiroStreamEvent::Text(text) = frame.classify() {
            turn.absorb(RelayEvent::TextDelta(text));
        }
    }
    turn.absorb(RelayEvent::Finish {
        stop: StopKind::EndTurn,
        usage: TurnUsage::default(),
    });

    let resp = turn.into_messages_response("msg_rt".to_string(), &ex.model);
    assert_eq!(
        serde_json::to_value(&resp.content).unwrap(),
        json!([{"type": "text", "text": "greppable \u{00fc}\u{6f22}\t exact\n  bytes"}])
    );
}

#[test]
fn claude_tool_use_preserves_name_and_input_semantics() {
    let req: MessagesRequest = serde_json::from_value(json!({
        "model": "claude-sonnet-4-20250514",
        "messages": [{"role": "user", "content": "weather?"}],
        "tools": [{
            "name": "get_weather",
            "description": "look up weather",
            "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
        }]
    }))
    .unwrap();
    let ex = Exchange::from(req);

    let upstream = build_assistant_request(&ex, "conv-2".to_string(), None);
    let tools = upstream
        .conversation_state
        .current_message
        .user_input_message
        .as_ref()
        .unwrap()
        .user_input_message_context
        .as_ref()
        .unwrap()
        .tools
        .as_ref()
        .unwrap();
    assert_eq!(tools[0].tool_specification.name, "get_weather");

    // Upstream emits a fragmented tool call.
    let mut turn = CompletedTurn::default();
    turn.absorb(RelayEvent::ToolUseStart {
        id: "toolu_rt".to_string(),
        name: "get_weather".to_string(),
    });
    turn.absorb(RelayEvent::ToolUseInputDelta("{\"city\"".to_string()));
    turn.absorb(RelayEvent::ToolUseInputDelta(":\"Berlin\"}".to_string()));
    turn.absorb(RelayEvent::ToolUseStop);
    turn.absorb(RelayEvent::Finish {
        stop: StopKind::ToolUse,
        usage: TurnUsage::default(),
    });

    let resp = turn.into_messages_response("msg_rt".to_string(), &ex.model);
    let rendered = serde_json::to_value(&resp.content).unwrap();
    assert_eq!(rendered[0]["type"], "tool_use");
    assert_eq!(rendered[0]["name"], "get_weather");
    assert_eq!(rendered[0]["input"], json!({"city": "Berlin"}));
    assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
}

#[test]
fn openai_tool_use_maps_to_tool_calls_with_identical_arguments() {
    let req: ChatCompletionsRequest = serde_json::from_value(json!({
        "model": "claude-sonnet-4-20250514",
        "messages": [{"role": "user", "content": "weather?"}],
        "tools": [{
            "type": "function",
            "function": {"name": "get_weather", "parameters": {"type": "object"}}
        }]
    }))
    .unwrap();
    let ex = Exchange::from(req);
    assert_eq!(ex.tools[0].name, "get_weather");

    let mut turn = CompletedTurn::default();
    turn.absorb(RelayEvent::TextDelta("Checking.".to_string()));
    turn.absorb(RelayEvent::ToolUseStart {
        id: "toolu_x".to_string(),
        name: "get_weather".to_string(),
    });
    turn.absorb(RelayEvent::ToolUseInputDelta(
        "{\"city\":\"Berlin\",\"unit\":\"c\"}".to_string(),
    ));
    turn.absorb(RelayEvent::ToolUseStop);
    turn.absorb(RelayEvent::Finish {
        stop: StopKind::ToolUse,
        usage: TurnUsage::default(),
    });

    let resp = turn.into_chat_response("chatcmpl-rt".to_string(), 0, &ex.model);
    let message = &resp.choices[0].message;
    assert_eq!(
        message
            .content
            .as_ref()
            .map(castor_schema::openai::OpenaiContent::flatten_text)
            .as_deref(),
        Some("Checking.")
    );

    let calls = message.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "toolu_x");
    assert_eq!(calls[0].function.name, "get_weather");
    let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
    assert_eq!(args, json!({"city": "Berlin", "unit": "c"}));
    assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("tool_calls"));
}
