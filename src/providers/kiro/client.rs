use backon::ExponentialBuilder;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use castor_schema::exchange::{Exchange, RelayEvent, StopKind, TurnUsage};
use castor_schema::kiro::{KiroFrame, KiroStreamEvent, build_assistant_request};

use crate::config::KiroResolvedConfig;
use crate::error::GatewayError;
use crate::providers::dispatch::{EventStream, UpstreamBody};
use crate::providers::kiro::scanner::FrameScanner;
use crate::providers::manifest::CredentialLease;
use crate::providers::policy::classify_upstream_error;
use crate::providers::upstream_retry::{network_retry_policy, post_json_with_retry};

/// CodeWhisperer chat adapter. The upstream only streams; non-streaming
/// ingress collects the stream into a complete turn.
#[derive(Clone)]
pub struct KiroClient {
    cfg: Arc<KiroResolvedConfig>,
    client: reqwest::Client,
    retry_policy: ExponentialBuilder,
}

impl KiroClient {
    pub fn new(cfg: Arc<KiroResolvedConfig>, client: reqwest::Client) -> Self {
        let retry_policy = network_retry_policy(cfg.retry_max_times);
        Self {
            cfg,
            client,
            retry_policy,
        }
    }

    pub async fn dispatch(
        &self,
        lease: &CredentialLease,
        ex: &Exchange,
    ) -> Result<UpstreamBody, GatewayError> {
        let conversation_id = Uuid::new_v4().to_string();
        let payload = build_assistant_request(ex, conversation_id, self.cfg.profile_arn.clone());

        let url = self.cfg.assistant_response_url(lease.region.as_deref());
        debug!(
            lease_id = lease.id,
            model = %ex.model,
            stream = ex.stream,
            "[Kiro] Post -> {}",
            url
        );

        let resp = post_json_with_retry(
            "Kiro",
            &self.client,
            &url,
            Some(bearer_headers(&lease.access_token)?),
            &payload,
            &self.retry_policy,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(classify_upstream_error(resp).await);
        }

        Ok(UpstreamBody::Stream(kiro_event_stream(resp)))
    }
}

pub(crate) fn bearer_headers(access_token: &str) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
        .map_err(|_| GatewayError::Unexpected("access token is not header-safe".to_string()))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

struct KiroStreamState<S> {
    bytes: S,
    scanner: FrameScanner,
    pending: VecDeque<RelayEvent>,
    tool_open: bool,
    saw_tool_use: bool,
    finished: bool,
}

impl<S> KiroStreamState<S> {
    fn ingest(&mut self, frame: KiroFrame) {
        match frame.classify() {
            KiroStreamEvent::Text(text) => {
                self.pending.push_back(RelayEvent::TextDelta(text));
            }
            KiroStreamEvent::ToolUse {
                id,
                name,
                input,
                stop,
            } => {
                if !self.tool_open {
                    self.pending.push_back(RelayEvent::ToolUseStart { id, name });
                    self.tool_open = true;
                    self.saw_tool_use = true;
                }
                if let Some(fragment) = input {
                    self.pending
                        .push_back(RelayEvent::ToolUseInputDelta(fragment));
                }
                if stop {
                    self.pending.push_back(RelayEvent::ToolUseStop);
                    self.tool_open = false;
                }
            }
            KiroStreamEvent::Ignored => {}
        }
    }

    fn finish(&mut self) {
        if self.tool_open {
            self.pending.push_back(RelayEvent::ToolUseStop);
            self.tool_open = false;
        }
        let stop = if self.saw_tool_use {
            StopKind::ToolUse
        } else {
            StopKind::EndTurn
        };
        // CodeWhisperer reports no token counts; the meter estimates them.
        self.pending.push_back(RelayEvent::Finish {
            stop,
            usage: TurnUsage::default(),
        });
    }
}

/// Translate the CodeWhisperer byte stream into relay events.
fn kiro_event_stream(resp: reqwest::Response) -> EventStream {
    let state = KiroStreamState {
        bytes: resp.bytes_stream().boxed(),
        scanner: FrameScanner::new(),
        pending: VecDeque::new(),
        tool_open: false,
        saw_tool_use: false,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    for raw in st.scanner.push(&chunk) {
                        match serde_json::from_str::<KiroFrame>(&raw) {
                            Ok(frame) => st.ingest(frame),
                            Err(_) => {
                                warn!("[Kiro] skipping unparseable frame: {:.60}", raw);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(GatewayError::from(e)), st));
                }
                None => {
                    st.finished = true;
                    st.finish();
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(state: &mut KiroStreamState<()>) -> Vec<RelayEvent> {
        state.pending.drain(..).collect()
    }

    fn fresh() -> KiroStreamState<()> {
        KiroStreamState {
            bytes: (),
            scanner: FrameScanner::new(),
            pending: VecDeque::new(),
            tool_open: false,
            saw_tool_use: false,
            finished: false,
        }
    }

    #[test]
    fn text_frames_become_text_deltas() {
        let mut st = fresh();
        st.ingest(KiroFrame {
            content: Some("hel".to_string()),
            ..KiroFrame::default()
        });
        st.ingest(KiroFrame {
            content: Some("lo".to_string()),
            ..KiroFrame::default()
        });
        assert_eq!(
            drain(&mut st),
            vec![
                RelayEvent::TextDelta("hel".to_string()),
                RelayEvent::TextDelta("lo".to_string()),
            ]
        );
    }

    #[test]
    fn tool_use_fragments_open_stream_and_close() {
        let mut st = fresh();
        st.ingest(KiroFrame {
            tool_use_id: Some("t1".to_string()),
            name: Some("get_weather".to_string()),
            input: Some("{\"ci".to_string()),
            stop: Some(false),
            ..KiroFrame::default()
        });
        st.ingest(KiroFrame {
            tool_use_id: Some("t1".to_string()),
            name: Some("get_weather".to_string()),
            input: Some("ty\":\"B\"}".to_string()),
            stop: Some(true),
            ..KiroFrame::default()
        });
        st.finish();

        let events = drain(&mut st);
        assert_eq!(
            events[0],
            RelayEvent::ToolUseStart {
                id: "t1".to_string(),
                name: "get_weather".to_string(),
            }
        );
        assert!(matches!(events[4], RelayEvent::Finish {
            stop: StopKind::ToolUse,
            ..
        }));
    }

    #[test]
    fn truncated_tool_block_is_closed_on_finish() {
        let mut st = fresh();
        st.ingest(KiroFrame {
            tool_use_id: Some("t1".to_string()),
            name: Some("search".to_string()),
            input: Some("{".to_string()),
            stop: Some(false),
            ..KiroFrame::default()
        });
        st.finish();
        let events = drain(&mut st);
        assert!(events.contains(&RelayEvent::ToolUseStop));
    }
}
