use backon::ExponentialBuilder;
use chrono::Utc;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use rand::Rng as _;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use castor_schema::exchange::{Exchange, RelayEvent, StopKind, TurnUsage};
use castor_schema::gemini::{
    GeminiFunctionCall, GeminiResponseEnvelope, GenerateContentRequest, GenerateContentResponse,
    part_events,
};
use castor_sigcache::SignatureCache;

use crate::config::GeminiResolvedConfig;
use crate::error::GatewayError;
use crate::providers::dispatch::{EventStream, UpstreamBody};
use crate::providers::manifest::CredentialLease;
use crate::providers::policy::classify_upstream_error;
use crate::providers::upstream_retry::{network_retry_policy, post_json_with_retry};

const REQUEST_ID_PREFIX: &str = "agent";
const SESSION_ID_MAX_EXCLUSIVE: i64 = 9_000_000_000_000_000_000;

/// Gemini Antigravity adapter: wraps generateContent behind the
/// `v1internal` envelope and re-attaches cached thinking signatures on
/// sticky continuations.
#[derive(Clone)]
pub struct GeminiClient {
    cfg: Arc<GeminiResolvedConfig>,
    client: reqwest::Client,
    signatures: Arc<SignatureCache>,
    retry_policy: ExponentialBuilder,
}

impl GeminiClient {
    pub fn new(
        cfg: Arc<GeminiResolvedConfig>,
        client: reqwest::Client,
        signatures: Arc<SignatureCache>,
    ) -> Self {
        let retry_policy = network_retry_policy(cfg.retry_max_times);
        Self {
            cfg,
            client,
            signatures,
            retry_policy,
        }
    }

    pub async fn dispatch(
        &self,
        lease: &CredentialLease,
        ex: &Exchange,
    ) -> Result<UpstreamBody, GatewayError> {
        let mut request = GenerateContentRequest::from(ex);
        self.reattach_signatures(&mut request);

        let session_id = ex
            .session_hint
            .clone()
            .unwrap_or_else(Self::generate_session_id);
        request
            .extra
            .insert("sessionId".to_string(), Value::String(session_id));

        let project = lease.project_id.clone().ok_or_else(|| {
            GatewayError::Unexpected(format!(
                "gemini credential {} has no project id; refresh must discover it first",
                lease.id
            ))
        })?;

        let payload = json!({
            "model": ex.model,
            "project": project,
            "requestId": Self::generate_request_id(),
            "request": request,
        });

        let url = if ex.stream {
            self.cfg.stream_generate_url()
        } else {
            self.cfg.generate_url()
        };
        debug!(
            lease_id = lease.id,
            model = %ex.model,
            stream = ex.stream,
            "[Gemini] Post -> {}",
            url
        );

        let resp = post_json_with_retry(
            "Gemini",
            &self.client,
            &url,
            Some(Self::headers(&lease.access_token)?),
            &payload,
            &self.retry_policy,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(classify_upstream_error(resp).await);
        }

        if ex.stream {
            Ok(UpstreamBody::Stream(self.event_stream(resp)))
        } else {
            let raw = resp.text().await?;
            let envelope: GeminiResponseEnvelope = serde_json::from_str(&raw)?;
            let body = envelope.into_inner(&raw);
            Ok(UpstreamBody::Complete(self.complete_turn(body)))
        }
    }

    fn headers(access_token: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| GatewayError::Unexpected("access token is not header-safe".to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn generate_request_id() -> String {
        format!(
            "{REQUEST_ID_PREFIX}/{}/{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        )
    }

    fn generate_session_id() -> String {
        let value = rand::rng().random_range(0..SESSION_ID_MAX_EXCLUSIVE);
        format!("-{value}")
    }

    /// Model-turn thought parts and signed tool calls must carry a
    /// signature on replay; recall the cached one for the exact content, or
    /// the validator-skip placeholder when the cache has expired.
    fn reattach_signatures(&self, request: &mut GenerateContentRequest) {
        for content in &mut request.contents {
            if content.role.as_deref() != Some("model") {
                continue;
            }
            for part in &mut content.parts {
                if part.thought_signature.is_some() {
                    continue;
                }
                let signature = if let Some(call) = &part.function_call {
                    self.signatures.recall_call_or_fallback(&call_payload(call))
                } else if part.thought.unwrap_or(false) {
                    self.signatures
                        .recall_or_fallback(part.text.as_deref().unwrap_or_default())
                } else {
                    continue;
                };
                part.thought_signature = Some(signature.to_string());
            }
        }
    }

    fn complete_turn(&self, body: GenerateContentResponse) -> castor_schema::exchange::CompletedTurn {
        let mut turn = castor_schema::exchange::CompletedTurn::default();
        if let Some(version) = &body.model_version {
            turn.absorb(RelayEvent::Start {
                model: version.clone(),
            });
        }

        let mut saw_tool_use = false;
        let mut finish = StopKind::EndTurn;
        if let Some(candidate) = body.candidates.first() {
            for part in &candidate.content.parts {
                capture_call_signature(&self.signatures, part);
                for event in part_events(part) {
                    if matches!(event, RelayEvent::ToolUseStart { .. }) {
                        saw_tool_use = true;
                    }
                    turn.absorb(event);
                }
            }
            finish = castor_schema::gemini::stop_kind(candidate, saw_tool_use);
        }

        let usage = body.usage_metadata.map(TurnUsage::from).unwrap_or_default();
        turn.absorb(RelayEvent::Finish {
            stop: finish,
            usage,
        });
        self.cache_turn_signatures(&turn);
        turn
    }

    fn cache_turn_signatures(&self, turn: &castor_schema::exchange::CompletedTurn) {
        for part in &turn.parts {
            if let castor_schema::exchange::MessagePart::Thinking {
                text,
                signature: Some(sig),
            } = part
            {
                self.signatures.remember(text, sig);
            }
        }
    }

    fn event_stream(&self, resp: reqwest::Response) -> EventStream {
        struct StreamState<S> {
            events: S,
            pending: VecDeque<RelayEvent>,
            signatures: Arc<SignatureCache>,
            thinking_buf: String,
            saw_tool_use: bool,
            finish_reason: Option<String>,
            usage: TurnUsage,
            finished: bool,
        }

        impl<S> StreamState<S> {
            fn ingest(&mut self, body: &GenerateContentResponse) {
                if let Some(meta) = body.usage_metadata {
                    self.usage = TurnUsage::from(meta);
                }
                let Some(candidate) = body.candidates.first() else {
                    return;
                };
                if let Some(reason) = &candidate.finish_reason {
                    self.finish_reason = Some(reason.clone());
                }
                for part in &candidate.content.parts {
                    capture_call_signature(&self.signatures, part);
                    for event in part_events(part) {
                        match &event {
                            RelayEvent::ToolUseStart { .. } => self.saw_tool_use = true,
                            RelayEvent::ThinkingDelta(delta) => {
                                self.thinking_buf.push_str(delta);
                            }
                            RelayEvent::ThinkingSignature(sig) => {
                                self.signatures.remember(&self.thinking_buf, sig);
                            }
                            _ => {}
                        }
                        self.pending.push_back(event);
                    }
                }
            }

            fn finish(&mut self) {
                let stop = match self.finish_reason.as_deref() {
                    Some("MAX_TOKENS") => StopKind::MaxTokens,
                    _ if self.saw_tool_use => StopKind::ToolUse,
                    _ => StopKind::EndTurn,
                };
                self.pending.push_back(RelayEvent::Finish {
                    stop,
                    usage: self.usage,
                });
            }
        }

        let state = StreamState {
            events: resp.bytes_stream().eventsource().boxed(),
            pending: VecDeque::new(),
            signatures: Arc::clone(&self.signatures),
            thinking_buf: String::new(),
            saw_tool_use: false,
            finish_reason: None,
            usage: TurnUsage::default(),
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

                match st.events.next().await {
                    Some(Ok(sse)) => {
                        if sse.data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<GeminiResponseEnvelope>(&sse.data) {
                            Ok(envelope) => {
                                let body = envelope.into_inner(&sse.data);
                                st.ingest(&body);
                            }
                            Err(_) => {
                                warn!("[Gemini] skipping invalid SSE data: {:.60}", sse.data);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((
                            Err(GatewayError::StreamProtocol(e.to_string())),
                            st,
                        ));
                    }
                    None => {
                        st.finished = true;
                        st.finish();
                    }
                }
            }
        }))
    }
}

/// Canonical payload fingerprinted for tool-call signature continuity.
fn call_payload(call: &GeminiFunctionCall) -> Value {
    json!({ "name": call.name, "args": call.args })
}

/// Tool-call parts carry their signature inline rather than through the
/// relay event grammar; capture it straight off the wire part.
fn capture_call_signature(signatures: &SignatureCache, part: &castor_schema::gemini::GeminiPart) {
    if let (Some(call), Some(sig)) = (&part.function_call, &part.thought_signature) {
        signatures.remember_call(&call_payload(call), sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_schema::gemini::{GeminiContent, GeminiPart};

    fn client() -> GeminiClient {
        GeminiClient::new(
            Arc::new(crate::config::GeminiConfig::default().resolve(&Default::default())),
            reqwest::Client::new(),
            Arc::new(SignatureCache::new(3600, 1024)),
        )
    }

    #[test]
    fn session_id_is_negative_decimal_string() {
        let id = GeminiClient::generate_session_id();
        assert!(id.starts_with('-'));
        assert!(id[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn request_id_uses_agent_timestamp_uuid_shape() {
        let id = GeminiClient::generate_request_id();
        let parts: Vec<&str> = id.splitn(3, '/').collect();
        assert_eq!(parts[0], "agent");
        assert!(parts[1].parse::<i64>().is_ok());
        assert!(Uuid::parse_str(parts[2]).is_ok());
    }

    #[test]
    fn cached_signature_is_reattached_to_thought_parts() {
        let gemini = client();
        assert!(gemini.signatures.remember("prior reasoning", "sig_live"));

        let mut request = GenerateContentRequest {
            contents: vec![GeminiContent {
                role: Some("model".to_string()),
                parts: vec![GeminiPart {
                    thought: Some(true),
                    text: Some("prior reasoning".to_string()),
                    ..GeminiPart::default()
                }],
            }],
            ..GenerateContentRequest::default()
        };
        gemini.reattach_signatures(&mut request);
        assert_eq!(
            request.contents[0].parts[0].thought_signature.as_deref(),
            Some("sig_live")
        );
    }

    #[test]
    fn expired_signature_falls_back_to_placeholder() {
        let gemini = client();
        let mut request = GenerateContentRequest {
            contents: vec![GeminiContent {
                role: Some("model".to_string()),
                parts: vec![GeminiPart {
                    thought: Some(true),
                    text: Some("unseen reasoning".to_string()),
                    ..GeminiPart::default()
                }],
            }],
            ..GenerateContentRequest::default()
        };
        gemini.reattach_signatures(&mut request);
        assert_eq!(
            request.contents[0].parts[0].thought_signature.as_deref(),
            Some("skip_thought_signature_validator")
        );
    }

    #[test]
    fn signed_tool_call_replays_through_the_call_domain() {
        let gemini = client();
        let call = GeminiFunctionCall {
            id: None,
            name: "get_weather".to_string(),
            args: serde_json::json!({"city": "Berlin"}),
        };

        // A signed call observed on the wire...
        capture_call_signature(
            &gemini.signatures,
            &GeminiPart {
                function_call: Some(GeminiFunctionCall {
                    id: None,
                    name: "get_weather".to_string(),
                    args: serde_json::json!({"city": "Berlin"}),
                }),
                thought_signature: Some("sig_call".to_string()),
                ..GeminiPart::default()
            },
        );

        // ...is re-attached when the client replays the same call.
        let mut request = GenerateContentRequest {
            contents: vec![GeminiContent {
                role: Some("model".to_string()),
                parts: vec![GeminiPart {
                    function_call: Some(call),
                    ..GeminiPart::default()
                }],
            }],
            ..GenerateContentRequest::default()
        };
        gemini.reattach_signatures(&mut request);
        assert_eq!(
            request.contents[0].parts[0].thought_signature.as_deref(),
            Some("sig_call")
        );
    }

    #[test]
    fn user_turns_are_never_signed() {
        let gemini = client();
        let mut request = GenerateContentRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    thought: Some(true),
                    text: Some("not a model turn".to_string()),
                    ..GeminiPart::default()
                }],
            }],
            ..GenerateContentRequest::default()
        };
        gemini.reattach_signatures(&mut request);
        assert!(request.contents[0].parts[0].thought_signature.is_none());
    }
}
