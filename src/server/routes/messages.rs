use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

use castor_schema::MessagesRequest;
use castor_schema::exchange::Exchange;

use crate::error::{Dialect, GatewayError};
use crate::meter::{RequestRecord, estimate_input_tokens};
use crate::providers::UpstreamBody;
use crate::providers::manifest::ProviderKind;
use crate::relay::ClaudeFramer;
use crate::server::guards::auth::AuthedKey;
use crate::server::respond::{MeterContext, claude_stream_response, error_response};
use crate::server::router::GatewayState;
use crate::server::routes::{preflight, resolve_usage, route_provider};

/// `POST /v1/messages`: Claude dialect, provider resolved per request.
pub async fn messages_handler(
    State(state): State<GatewayState>,
    auth: AuthedKey,
    headers: HeaderMap,
    Json(body): Json<MessagesRequest>,
) -> Response {
    handle_claude_dialect(state, auth, headers, body, None).await
}

/// `POST /gemini-antigravity/v1/messages`: Claude-shaped body pinned to
/// the Gemini Antigravity upstream.
pub async fn antigravity_messages_handler(
    State(state): State<GatewayState>,
    auth: AuthedKey,
    headers: HeaderMap,
    Json(body): Json<MessagesRequest>,
) -> Response {
    handle_claude_dialect(state, auth, headers, body, Some(ProviderKind::Gemini)).await
}

async fn handle_claude_dialect(
    state: GatewayState,
    auth: AuthedKey,
    headers: HeaderMap,
    body: MessagesRequest,
    forced_provider: Option<ProviderKind>,
) -> Response {
    let started = Instant::now();

    if body.model.trim().is_empty() || body.messages.is_empty() {
        return error_response(
            GatewayError::BadRequest("model and messages are required".to_string()),
            Dialect::Claude,
        );
    }

    let ex = Exchange::from(body);
    let provider =
        forced_provider.unwrap_or_else(|| route_provider(&headers, &ex.model, state.default_provider));

    let mut pre = match preflight(&state, &auth, &headers).await {
        Ok(pre) => pre,
        Err(err) => return error_response(err, Dialect::Claude),
    };

    let input_estimate = estimate_input_tokens(&ex);
    let mut record = RequestRecord {
        request_id: pre.request_id.clone(),
        api_key_id: auth.key.id,
        ip_address: Some(auth.client_ip.clone()),
        provider,
        credential_id: None,
        model: ex.model.clone(),
        stream: ex.stream,
        usage: castor_schema::exchange::TurnUsage {
            input_tokens: input_estimate,
            ..Default::default()
        },
        status_code: 200,
        error_message: None,
    };

    let dispatched = match state.executor.execute(provider, &ex).await {
        Ok(dispatched) => dispatched,
        Err(err) => {
            let rendered = err.into_dialect(Dialect::Claude);
            record.status_code = rendered.status.as_u16();
            record.error_message = Some(rendered.body.error.message.clone());
            state.meter.record(record, started).await;
            return rendered.into_response();
        }
    };

    state.meter.warn_on_critical_quota(
        provider,
        dispatched.lease.id,
        &ex.model,
        dispatched.lease.quota_remaining,
    );
    record.credential_id = Some(dispatched.lease.id);

    let msg_id = format!("msg_{}", Uuid::new_v4().simple());

    if ex.stream {
        let stream = match dispatched.body {
            UpstreamBody::Stream(stream) => stream,
            UpstreamBody::Complete(turn) => {
                // Stream ingress over a non-streaming upstream reply:
                // replay the collected turn as events.
                Box::pin(futures::stream::iter(
                    turn_events(turn).into_iter().map(Ok),
                ))
            }
        };
        let framer = ClaudeFramer::new(msg_id, ex.model.clone(), input_estimate);
        let ctx = MeterContext {
            meter: state.meter.clone(),
            record,
            started,
        };
        return claude_stream_response(stream, framer, ctx, pre.slot.take()).into_response();
    }

    match dispatched.body.into_complete().await {
        Ok(turn) => {
            record.usage = resolve_usage(&turn, input_estimate);
            state.meter.record(record, started).await;
            Json(turn.into_messages_response(msg_id, &ex.model)).into_response()
        }
        Err(err) => {
            let rendered = err.into_dialect(Dialect::Claude);
            record.status_code = rendered.status.as_u16();
            record.error_message = Some(rendered.body.error.message.clone());
            state.meter.record(record, started).await;
            rendered.into_response()
        }
    }
}

/// Replay an assembled turn as relay events (used when the upstream
/// answered without streaming but the client asked for SSE).
pub(crate) fn turn_events(
    turn: castor_schema::exchange::CompletedTurn,
) -> Vec<castor_schema::exchange::RelayEvent> {
    use castor_schema::exchange::{MessagePart, RelayEvent, StopKind};

    let mut events = Vec::new();
    if !turn.model.is_empty() {
        events.push(RelayEvent::Start {
            model: turn.model.clone(),
        });
    }
    for part in turn.parts {
        match part {
            MessagePart::Text { text } => events.push(RelayEvent::TextDelta(text)),
            MessagePart::Thinking { text, signature } => {
                events.push(RelayEvent::ThinkingDelta(text));
                if let Some(sig) = signature {
                    events.push(RelayEvent::ThinkingSignature(sig));
                }
            }
            MessagePart::ToolUse { id, name, input } => {
                events.push(RelayEvent::ToolUseStart { id, name });
                events.push(RelayEvent::ToolUseInputDelta(input.to_string()));
                events.push(RelayEvent::ToolUseStop);
            }
            MessagePart::ToolResult { .. } => {}
        }
    }
    events.push(RelayEvent::Finish {
        stop: turn.stop.unwrap_or(StopKind::EndTurn),
        usage: turn.usage,
    });
    events
}
