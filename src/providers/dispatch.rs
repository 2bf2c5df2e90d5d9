use futures::Stream;
use std::pin::Pin;

use castor_schema::exchange::{CompletedTurn, Exchange, RelayEvent};

use crate::error::GatewayError;
use crate::providers::anthropic::ClaudeClient;
use crate::providers::gemini::GeminiClient;
use crate::providers::kiro::KiroClient;
use crate::providers::manifest::CredentialLease;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<RelayEvent, GatewayError>> + Send>>;

/// What an upstream call produced: a live event stream or a complete turn.
pub enum UpstreamBody {
    Stream(EventStream),
    Complete(CompletedTurn),
}

impl UpstreamBody {
    /// Collect a stream into a complete turn (non-streaming ingress over a
    /// stream-only upstream).
    pub async fn into_complete(self) -> Result<CompletedTurn, GatewayError> {
        use futures::StreamExt;
        match self {
            UpstreamBody::Complete(turn) => Ok(turn),
            UpstreamBody::Stream(mut stream) => {
                let mut turn = CompletedTurn::default();
                while let Some(event) = stream.next().await {
                    turn.absorb(event?);
                }
                Ok(turn)
            }
        }
    }
}

/// Dialect adapters for the supported upstream families. Claude-compatible
/// providers (Anthropic, Orchids, Warp, Vertex, Bedrock) share the Messages
/// adapter with per-provider base URLs.
#[derive(Clone)]
pub enum Dispatcher {
    Kiro(KiroClient),
    Gemini(GeminiClient),
    Claude(ClaudeClient),
}

impl Dispatcher {
    pub async fn dispatch(
        &self,
        lease: &CredentialLease,
        ex: &Exchange,
    ) -> Result<UpstreamBody, GatewayError> {
        match self {
            Dispatcher::Kiro(client) => client.dispatch(lease, ex).await,
            Dispatcher::Gemini(client) => client.dispatch(lease, ex).await,
            Dispatcher::Claude(client) => client.dispatch(lease, ex).await,
        }
    }
}
