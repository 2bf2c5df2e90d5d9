use backon::ExponentialBuilder;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use castor_schema::claude::{ClaudeContentBlock, ClaudeDelta, ClaudeStreamEvent};
use castor_schema::exchange::{Exchange, RelayEvent, StopKind, TurnUsage};
use castor_schema::{MessagesRequest, MessagesResponse};

use crate::config::AnthropicResolvedConfig;
use crate::error::GatewayError;
use crate::providers::dispatch::{EventStream, UpstreamBody};
use crate::providers::manifest::{CredentialLease, ProviderKind};
use crate::providers::policy::classify_upstream_error;
use crate::providers::upstream_retry::{network_retry_policy, post_json_with_retry};

const ANTHROPIC_VERSION: HeaderName = HeaderName::from_static("anthropic-version");

/// Anthropic Messages adapter, shared by every Claude-compatible provider;
/// the lease's provider selects the base URL.
#[derive(Clone)]
pub struct ClaudeClient {
    cfg: Arc<AnthropicResolvedConfig>,
    client: reqwest::Client,
    retry_policy: ExponentialBuilder,
}

impl ClaudeClient {
    pub fn new(cfg: Arc<AnthropicResolvedConfig>, client: reqwest::Client) -> Self {
        let retry_policy = network_retry_policy(cfg.retry_max_times);
        Self {
            cfg,
            client,
            retry_policy,
        }
    }

    fn base_url(&self, provider: ProviderKind) -> Result<Url, GatewayError> {
        if provider == ProviderKind::Anthropic {
            return Ok(self.cfg.api_url.clone());
        }
        self.cfg
            .compat
            .get(provider.as_str())
            .cloned()
            .ok_or_else(|| {
                GatewayError::Unexpected(format!(
                    "no base URL configured for claude-compatible provider '{provider}'"
                ))
            })
    }

    pub async fn dispatch(
        &self,
        lease: &CredentialLease,
        ex: &Exchange,
    ) -> Result<UpstreamBody, GatewayError> {
        let base = self.base_url(lease.provider)?;
        let url = AnthropicResolvedConfig::messages_url(&base);
        let payload = MessagesRequest::from(ex);

        debug!(
            lease_id = lease.id,
            provider = %lease.provider,
            model = %ex.model,
            stream = ex.stream,
            "[Claude] Post -> {}",
            url
        );

        let resp = post_json_with_retry(
            "Claude",
            &self.client,
            &url,
            Some(self.headers(&lease.access_token)?),
            &payload,
            &self.retry_policy,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(classify_upstream_error(resp).await);
        }

        if ex.stream {
            Ok(UpstreamBody::Stream(claude_event_stream(resp)))
        } else {
            let body: MessagesResponse = resp.json().await?;
            Ok(UpstreamBody::Complete(body.into_completed_turn()))
        }
    }

    fn headers(&self, access_token: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| GatewayError::Unexpected("access token is not header-safe".to_string()))?;
        headers.insert(AUTHORIZATION, value);
        headers.insert(
            ANTHROPIC_VERSION,
            HeaderValue::from_str(&self.cfg.api_version)
                .map_err(|_| GatewayError::Unexpected("invalid anthropic-version".to_string()))?,
        );
        Ok(headers)
    }
}

/// Translate the upstream Claude SSE grammar into relay events.
fn claude_event_stream(resp: reqwest::Response) -> EventStream {
    struct StreamState<S> {
        events: S,
        pending: VecDeque<RelayEvent>,
        usage: TurnUsage,
        stop: StopKind,
        tool_open: bool,
        finished: bool,
        emitted_finish: bool,
    }

    impl<S> StreamState<S> {
        fn ingest(&mut self, event: ClaudeStreamEvent) {
            match event {
                ClaudeStreamEvent::MessageStart { message } => {
                    self.usage.input_tokens = message.usage.input_tokens;
                    self.usage.cache_write_tokens =
                        message.usage.cache_creation_input_tokens.unwrap_or(0);
                    self.usage.cache_read_tokens =
                        message.usage.cache_read_input_tokens.unwrap_or(0);
                    self.pending.push_back(RelayEvent::Start {
                        model: message.model,
                    });
                }
                ClaudeStreamEvent::ContentBlockStart { content_block, .. } => {
                    match content_block {
                        ClaudeContentBlock::ToolUse { id, name, .. } => {
                            self.pending.push_back(RelayEvent::ToolUseStart { id, name });
                            self.tool_open = true;
                        }
                        ClaudeContentBlock::Text { text } if !text.is_empty() => {
                            self.pending.push_back(RelayEvent::TextDelta(text));
                        }
                        ClaudeContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                            self.pending.push_back(RelayEvent::ThinkingDelta(thinking));
                        }
                        _ => {}
                    }
                }
                ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                    ClaudeDelta::TextDelta { text } => {
                        self.pending.push_back(RelayEvent::TextDelta(text));
                    }
                    ClaudeDelta::ThinkingDelta { thinking } => {
                        self.pending.push_back(RelayEvent::ThinkingDelta(thinking));
                    }
                    ClaudeDelta::SignatureDelta { signature } => {
                        self.pending
                            .push_back(RelayEvent::ThinkingSignature(signature));
                    }
                    ClaudeDelta::InputJsonDelta { partial_json } => {
                        self.pending
                            .push_back(RelayEvent::ToolUseInputDelta(partial_json));
                    }
                },
                ClaudeStreamEvent::ContentBlockStop { .. } => {
                    if self.tool_open {
                        self.pending.push_back(RelayEvent::ToolUseStop);
                        self.tool_open = false;
                    }
                }
                ClaudeStreamEvent::MessageDelta { delta, usage } => {
                    self.usage.output_tokens = usage.output_tokens;
                    self.stop = match delta.stop_reason.as_deref() {
                        Some("max_tokens") => StopKind::MaxTokens,
                        Some("tool_use") => StopKind::ToolUse,
                        Some("stop_sequence") => StopKind::StopSequence,
                        _ => StopKind::EndTurn,
                    };
                }
                ClaudeStreamEvent::MessageStop => {
                    self.pending.push_back(RelayEvent::Finish {
                        stop: self.stop,
                        usage: self.usage,
                    });
                    self.emitted_finish = true;
                }
                ClaudeStreamEvent::Ping | ClaudeStreamEvent::Error { .. } => {}
            }
        }
    }

    let state = StreamState {
        events: resp.bytes_stream().eventsource().boxed(),
        pending: VecDeque::new(),
        usage: TurnUsage::default(),
        stop: StopKind::EndTurn,
        tool_open: false,
        finished: false,
        emitted_finish: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            match st.events.next().await {
                Some(Ok(sse)) => {
                    if sse.data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ClaudeStreamEvent>(&sse.data) {
                        Ok(event) => st.ingest(event),
                        Err(_) => {
                            warn!("[Claude] skipping invalid SSE data: {:.60}", sse.data);
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(GatewayError::StreamProtocol(e.to_string())), st));
                }
                None => {
                    st.finished = true;
                    if !st.emitted_finish {
                        st.pending.push_back(RelayEvent::Finish {
                            stop: st.stop,
                            usage: st.usage,
                        });
                    }
                }
            }
        }
    }))
}
