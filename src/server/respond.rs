use axum::response::{
    IntoResponse,
    sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::warn;

use castor_schema::exchange::TurnUsage;

use crate::error::{Dialect, GatewayError};
use crate::locks::SlotGuard;
use crate::meter::{RequestRecord, UsageMeter};
use crate::providers::EventStream;
use crate::relay::{ClaudeFramer, OpenaiFramer};

/// Status recorded for a stream the client abandoned.
const CLIENT_CLOSED_STATUS: u16 = 499;

/// Dialect-specific rendering of relay events into SSE `Event`s.
pub trait SseFramer: Send {
    fn on_event(&mut self, event: castor_schema::exchange::RelayEvent) -> Vec<Event>;
    fn on_error(&mut self, err: &GatewayError) -> Vec<Event>;
    fn on_end(&mut self) -> Vec<Event>;
    fn finished(&self) -> bool;
    fn final_usage(&self) -> TurnUsage;
}

fn json_event(name: Option<&str>, payload: &impl serde::Serialize) -> Option<Event> {
    let event = Event::default();
    let event = match name {
        Some(name) => event.event(name),
        None => event,
    };
    match event.json_data(payload) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!("failed to serialize SSE payload: {}", e);
            None
        }
    }
}

impl SseFramer for ClaudeFramer {
    fn on_event(&mut self, event: castor_schema::exchange::RelayEvent) -> Vec<Event> {
        ClaudeFramer::on_event(self, event)
            .iter()
            .filter_map(|ev| json_event(Some(ev.event_name()), ev))
            .collect()
    }

    fn on_error(&mut self, err: &GatewayError) -> Vec<Event> {
        let kind = self_dialect_kind(err.class());
        ClaudeFramer::on_error(self, kind, &err.to_string())
            .iter()
            .filter_map(|ev| json_event(Some(ev.event_name()), ev))
            .collect()
    }

    fn on_end(&mut self) -> Vec<Event> {
        Vec::new()
    }

    fn finished(&self) -> bool {
        ClaudeFramer::finished(self)
    }

    fn final_usage(&self) -> TurnUsage {
        ClaudeFramer::final_usage(self)
    }
}

fn self_dialect_kind(class: crate::error::ErrorClass) -> &'static str {
    match class {
        crate::error::ErrorClass::Auth => "authentication_error",
        crate::error::ErrorClass::RateLimit | crate::error::ErrorClass::LimitExceeded => {
            "rate_limit_error"
        }
        crate::error::ErrorClass::BadRequest => "invalid_request_error",
        crate::error::ErrorClass::Unavailable => "overloaded_error",
        _ => "api_error",
    }
}

impl SseFramer for OpenaiFramer {
    fn on_event(&mut self, event: castor_schema::exchange::RelayEvent) -> Vec<Event> {
        OpenaiFramer::on_event(self, event)
            .iter()
            .filter_map(|chunk| json_event(None, chunk))
            .collect()
    }

    fn on_error(&mut self, err: &GatewayError) -> Vec<Event> {
        let body = crate::error::ErrorBody::new(self_dialect_kind(err.class()), err.to_string());
        json_event(None, &body).into_iter().collect()
    }

    fn on_end(&mut self) -> Vec<Event> {
        if OpenaiFramer::finished(self) {
            vec![Event::default().data("[DONE]")]
        } else {
            // Cancelled or errored: close without a terminator.
            Vec::new()
        }
    }

    fn finished(&self) -> bool {
        OpenaiFramer::finished(self)
    }

    fn final_usage(&self) -> TurnUsage {
        OpenaiFramer::final_usage(self)
    }
}

/// Metering context resolved when the stream terminates.
pub struct MeterContext {
    pub meter: UsageMeter,
    pub record: RequestRecord,
    pub started: Instant,
}

/// SSE body: pulls relay events, frames them into the inbound dialect, and
/// on the terminal state (completion, error, or drop) writes the request
/// log and releases the concurrency slot.
pub struct SseRelay<F: SseFramer> {
    inner: Option<EventStream>,
    framer: F,
    pending: VecDeque<Event>,
    meter_ctx: Option<MeterContext>,
    stream_error: Option<String>,
    _slot: Option<SlotGuard>,
}

impl<F: SseFramer> SseRelay<F> {
    pub fn new(
        inner: EventStream,
        framer: F,
        meter_ctx: MeterContext,
        slot: Option<SlotGuard>,
    ) -> Self {
        Self {
            inner: Some(inner),
            framer,
            pending: VecDeque::new(),
            meter_ctx: Some(meter_ctx),
            stream_error: None,
            _slot: slot,
        }
    }

    fn finalize(&mut self) {
        let Some(ctx) = self.meter_ctx.take() else {
            return;
        };
        let mut record = ctx.record;
        record.usage = self.framer.final_usage();
        if let Some(message) = self.stream_error.take() {
            record.status_code = 200; // headers were already written
            record.error_message = Some(message);
        } else if !self.framer.finished() {
            record.status_code = CLIENT_CLOSED_STATUS;
            record.error_message = Some("client closed connection".to_string());
        }
        ctx.meter.record_detached(record, ctx.started);
    }
}

impl<F: SseFramer + Unpin> Stream for SseRelay<F> {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let Some(inner) = self.inner.as_mut() else {
                self.finalize();
                return Poll::Ready(None);
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(event))) => {
                    let framed = self.framer.on_event(event);
                    self.pending.extend(framed);
                }
                Poll::Ready(Some(Err(err))) => {
                    self.stream_error = Some(err.to_string());
                    let framed = self.framer.on_error(&err);
                    self.pending.extend(framed);
                    self.inner = None;
                }
                Poll::Ready(None) => {
                    let framed = self.framer.on_end();
                    self.pending.extend(framed);
                    self.inner = None;
                }
            }
        }
    }
}

impl<F: SseFramer> Drop for SseRelay<F> {
    fn drop(&mut self) {
        // Client disconnect path: the body is dropped before completion.
        self.finalize();
    }
}

/// Build the SSE response for a Claude-dialect stream.
pub fn claude_stream_response(
    inner: EventStream,
    framer: ClaudeFramer,
    meter_ctx: MeterContext,
    slot: Option<SlotGuard>,
) -> impl IntoResponse {
    Sse::new(SseRelay::new(inner, framer, meter_ctx, slot)).keep_alive(KeepAlive::default())
}

/// Build the SSE response for an OpenAI-dialect stream.
pub fn openai_stream_response(
    inner: EventStream,
    framer: OpenaiFramer,
    meter_ctx: MeterContext,
    slot: Option<SlotGuard>,
) -> impl IntoResponse {
    Sse::new(SseRelay::new(inner, framer, meter_ctx, slot)).keep_alive(KeepAlive::default())
}

/// Dialect used by a handler for error rendering.
pub fn error_response(err: GatewayError, dialect: Dialect) -> axum::response::Response {
    err.into_dialect(dialect).into_response()
}
