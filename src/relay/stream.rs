use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use castor_schema::exchange::{RelayEvent, StopKind, TurnUsage};

use crate::error::GatewayError;
use crate::providers::EventStream;

/// Terminal state of one relayed stream.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Upstream finished cleanly.
    Clean { stop: StopKind, usage: TurnUsage },
    /// Upstream errored mid-stream.
    Failed { message: String, usage: TurnUsage },
    /// The consumer went away before the stream finished.
    Cancelled { usage: TurnUsage },
}

impl StreamEnd {
    pub fn usage(&self) -> TurnUsage {
        match self {
            StreamEnd::Clean { usage, .. }
            | StreamEnd::Failed { usage, .. }
            | StreamEnd::Cancelled { usage } => *usage,
        }
    }
}

type DoneCallback = Box<dyn FnOnce(StreamEnd) + Send>;

/// Pass-through relay stream that guarantees exactly one terminal
/// notification: on clean completion, on mid-stream error, or (via `Drop`)
/// on cancellation. The callback carries lock guards and bookkeeping, so it
/// fires on every exit path.
pub struct Monitored {
    inner: EventStream,
    on_done: Option<DoneCallback>,
    usage: TurnUsage,
    finish: Option<StopKind>,
    error: Option<String>,
}

impl Monitored {
    pub fn new(inner: EventStream, on_done: impl FnOnce(StreamEnd) + Send + 'static) -> Self {
        Self {
            inner,
            on_done: Some(Box::new(on_done)),
            usage: TurnUsage::default(),
            finish: None,
            error: None,
        }
    }

    fn complete(&mut self) {
        let Some(callback) = self.on_done.take() else {
            return;
        };
        let end = match (&self.error, self.finish) {
            (Some(message), _) => StreamEnd::Failed {
                message: message.clone(),
                usage: self.usage,
            },
            (None, Some(stop)) => StreamEnd::Clean {
                stop,
                usage: self.usage,
            },
            (None, None) => StreamEnd::Cancelled { usage: self.usage },
        };
        callback(end);
    }
}

impl Stream for Monitored {
    type Item = Result<RelayEvent, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(RelayEvent::Finish { stop, usage }))) => {
                self.finish = Some(*stop);
                self.usage = *usage;
            }
            Poll::Ready(Some(Err(e))) => {
                self.error = Some(e.to_string());
            }
            Poll::Ready(None) => {
                self.complete();
            }
            _ => {}
        }
        polled
    }
}

impl Drop for Monitored {
    fn drop(&mut self) {
        // Fires when the consumer drops the stream early (client
        // disconnect); a completed stream has already taken the callback.
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    fn capture() -> (Arc<Mutex<Option<StreamEnd>>>, impl FnOnce(StreamEnd) + Send) {
        let slot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, move |end| {
            *writer.lock().unwrap() = Some(end);
        })
    }

    #[tokio::test]
    async fn clean_stream_reports_finish_and_usage() {
        let events: Vec<Result<RelayEvent, GatewayError>> = vec![
            Ok(RelayEvent::TextDelta("hi".to_string())),
            Ok(RelayEvent::Finish {
                stop: StopKind::EndTurn,
                usage: TurnUsage {
                    input_tokens: 3,
                    output_tokens: 5,
                    ..TurnUsage::default()
                },
            }),
        ];
        let (slot, callback) = capture();
        let mut monitored = Monitored::new(Box::pin(futures::stream::iter(events)), callback);
        while monitored.next().await.is_some() {}

        match slot.lock().unwrap().clone().unwrap() {
            StreamEnd::Clean { stop, usage } => {
                assert_eq!(stop, StopKind::EndTurn);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("expected clean end, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_stream_reports_cancellation_exactly_once() {
        let events: Vec<Result<RelayEvent, GatewayError>> =
            vec![Ok(RelayEvent::TextDelta("partial".to_string()))];
        let (slot, callback) = capture();
        let mut monitored = Monitored::new(Box::pin(futures::stream::iter(events)), callback);
        let _ = monitored.next().await;
        drop(monitored);

        assert!(matches!(
            slot.lock().unwrap().clone().unwrap(),
            StreamEnd::Cancelled { .. }
        ));
    }

    #[tokio::test]
    async fn mid_stream_error_reports_failure() {
        let events: Vec<Result<RelayEvent, GatewayError>> = vec![
            Ok(RelayEvent::TextDelta("x".to_string())),
            Err(GatewayError::StreamProtocol("connection reset".to_string())),
        ];
        let (slot, callback) = capture();
        let mut monitored = Monitored::new(Box::pin(futures::stream::iter(events)), callback);
        while monitored.next().await.is_some() {}
        drop(monitored);

        assert!(matches!(
            slot.lock().unwrap().clone().unwrap(),
            StreamEnd::Failed { .. }
        ));
    }
}
