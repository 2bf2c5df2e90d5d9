use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use castor_schema::exchange::Exchange;

use crate::error::{ErrorClass, GatewayError};
use crate::pool::{AcquireRequest, RequestOutcome};
use crate::providers::manifest::ProviderKind;
use crate::providers::{Providers, UpstreamBody};
use crate::relay::stream::{Monitored, StreamEnd};

/// Upper bound on failover attempts per request (also bounded by pool size).
const MAX_ATTEMPTS: usize = 3;

/// One successfully dispatched request.
pub struct Dispatched {
    pub lease: crate::providers::manifest::CredentialLease,
    pub body: UpstreamBody,
}

/// The request-time orchestrator: selection, locking, refresh-if-needed,
/// dispatch, error classification, retry-with-exclusion.
#[derive(Clone)]
pub struct FailoverExecutor {
    providers: Providers,
    refresh_threshold: Duration,
}

impl FailoverExecutor {
    pub fn new(providers: Providers, refresh_threshold_secs: u64) -> Self {
        Self {
            providers,
            refresh_threshold: Duration::seconds(
                i64::try_from(refresh_threshold_secs).unwrap_or(600),
            ),
        }
    }

    /// Run the failover loop. Within one request a credential is attempted
    /// at most once: the exclusion list is append-only.
    pub async fn execute(
        &self,
        provider: ProviderKind,
        ex: &Exchange,
    ) -> Result<Dispatched, GatewayError> {
        let pool = self.providers.pool(provider).clone();
        let pool_size = pool.pool_size().await?;
        if pool_size == 0 {
            return Err(GatewayError::NoCredentials);
        }
        let max_attempts = pool_size.min(MAX_ATTEMPTS).max(1);
        let dispatcher = self.providers.dispatcher(provider);

        let mut excluded: Vec<i64> = Vec::new();
        let mut last_err = GatewayError::NoCredentials;

        for attempt in 1..=max_attempts {
            let Some(mut lease) = pool
                .acquire(AcquireRequest {
                    model: ex.model.clone(),
                    session_id: ex.session_hint.clone(),
                    exclude: excluded.clone(),
                })
                .await?
            else {
                break;
            };

            if !excluded.contains(&lease.id) {
                excluded.push(lease.id);
            }

            debug!(
                provider = %provider,
                attempt,
                max_attempts,
                credential_id = lease.id,
                model = %ex.model,
                "failover attempt"
            );

            // FIFO per-credential serialization; released by the guard on
            // every exit path below.
            let lock = self.providers.locks.acquire(lease.id).await;

            // Refresh-if-needed strictly precedes dispatch. A Gemini
            // credential without a project id also routes through the
            // refresher, whose flight runs the discovery handshake.
            let deadline = Utc::now() + self.refresh_threshold;
            let token_expiring = lease.expires_at.is_some_and(|t| t <= deadline);
            let needs_project =
                provider == ProviderKind::Gemini && lease.project_id.is_none();
            if token_expiring || needs_project {
                match self.providers.refresher.refresh(lease.id).await {
                    Ok(token) => {
                        lease.access_token = token.access_token;
                        lease.expires_at = token.expires_at;
                        if lease.project_id.is_none() {
                            lease.project_id = token.project_id;
                        }
                    }
                    Err(err) => {
                        // Terminal refusal already quarantined the
                        // credential; either way, try the next one.
                        warn!(
                            credential_id = lease.id,
                            "pre-dispatch refresh failed: {}", err
                        );
                        drop(lock);
                        last_err = err;
                        continue;
                    }
                }
            }

            match dispatcher.dispatch(&lease, ex).await {
                Ok(UpstreamBody::Complete(turn)) => {
                    pool.report_outcome(lease.id, RequestOutcome::Success);
                    drop(lock);
                    return Ok(Dispatched {
                        lease,
                        body: UpstreamBody::Complete(turn),
                    });
                }

                Ok(UpstreamBody::Stream(stream)) => {
                    // Success/failure recording and lock release ride the
                    // stream's terminal notification.
                    let id = lease.id;
                    let pool_for_stream = pool.clone();
                    let monitored = Monitored::new(stream, move |end| {
                        let outcome = match &end {
                            StreamEnd::Clean { .. } => RequestOutcome::Success,
                            StreamEnd::Failed { message, .. } => RequestOutcome::Transient {
                                message: message.clone(),
                            },
                            StreamEnd::Cancelled { .. } => RequestOutcome::Cancelled,
                        };
                        pool_for_stream.report_outcome(id, outcome);
                        drop(lock);
                    });
                    return Ok(Dispatched {
                        lease,
                        body: UpstreamBody::Stream(Box::pin(monitored)),
                    });
                }

                Err(err) => {
                    match err.class() {
                        ErrorClass::Auth => {
                            pool.report_outcome(
                                lease.id,
                                RequestOutcome::AuthFailure {
                                    message: err.to_string(),
                                },
                            );
                        }
                        ErrorClass::RateLimit => {
                            pool.report_outcome(lease.id, RequestOutcome::RateLimited);
                        }
                        ErrorClass::Transient => {
                            pool.report_outcome(
                                lease.id,
                                RequestOutcome::Transient {
                                    message: err.to_string(),
                                },
                            );
                        }
                        // A bad request will not succeed against a
                        // different credential; abort the loop.
                        _ => {
                            drop(lock);
                            return Err(err);
                        }
                    }
                    info!(
                        provider = %provider,
                        attempt,
                        credential_id = lease.id,
                        "attempt failed: {}; rotating credential",
                        err
                    );
                    drop(lock);
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }
}
