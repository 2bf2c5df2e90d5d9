use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

use castor_schema::ChatCompletionsRequest;
use castor_schema::exchange::Exchange;

use crate::error::{Dialect, GatewayError};
use crate::meter::{RequestRecord, estimate_input_tokens};
use crate::providers::UpstreamBody;
use crate::relay::OpenaiFramer;
use crate::server::guards::auth::AuthedKey;
use crate::server::respond::{MeterContext, error_response, openai_stream_response};
use crate::server::router::GatewayState;
use crate::server::routes::{messages::turn_events, preflight, resolve_usage, route_provider};

/// `POST /v1/chat/completions`: OpenAI dialect.
pub async fn chat_handler(
    State(state): State<GatewayState>,
    auth: AuthedKey,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionsRequest>,
) -> Response {
    let started = Instant::now();

    if body.model.trim().is_empty() || body.messages.is_empty() {
        return error_response(
            GatewayError::BadRequest("model and messages are required".to_string()),
            Dialect::Openai,
        );
    }

    let ex = Exchange::from(body);
    let provider = route_provider(&headers, &ex.model, state.default_provider);

    let mut pre = match preflight(&state, &auth, &headers).await {
        Ok(pre) => pre,
        Err(err) => return error_response(err, Dialect::Openai),
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
            let rendered = err.into_dialect(Dialect::Openai);
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

    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = Utc::now().timestamp();

    if ex.stream {
        let stream = match dispatched.body {
            UpstreamBody::Stream(stream) => stream,
            UpstreamBody::Complete(turn) => {
                Box::pin(futures::stream::iter(turn_events(turn).into_iter().map(Ok)))
            }
        };
        let framer = OpenaiFramer::new(completion_id, created, ex.model.clone(), input_estimate);
        let ctx = MeterContext {
            meter: state.meter.clone(),
            record,
            started,
        };
        return openai_stream_response(stream, framer, ctx, pre.slot.take()).into_response();
    }

    match dispatched.body.into_complete().await {
        Ok(turn) => {
            record.usage = resolve_usage(&turn, input_estimate);
            state.meter.record(record, started).await;
            Json(turn.into_chat_response(completion_id, created, &ex.model)).into_response()
        }
        Err(err) => {
            let rendered = err.into_dialect(Dialect::Openai);
            record.status_code = rendered.status.as_u16();
            record.error_message = Some(rendered.body.error.message.clone());
            state.meter.record(record, started).await;
            rendered.into_response()
        }
    }
}
