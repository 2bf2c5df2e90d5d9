use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Fresh token data produced by one successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Rotated refresh token, when the provider returns one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Project id for providers that require discovery before first use.
    pub project_id: Option<String>,
}

/// Shareable refresh failure. `Terminal` ends the credential's token
/// generation (quarantine); `Transient` leaves it in the pool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshFailure {
    #[error("refresh refused: {0}")]
    Terminal(String),
    #[error("refresh failed: {0}")]
    Transient(String),
}

pub type SharedOutcome = Result<RefreshedToken, RefreshFailure>;

type FlightSlot = watch::Receiver<Option<SharedOutcome>>;

/// Per-credential refresh deduplication.
///
/// Concurrent callers for one credential share a single in-flight refresh.
/// The flight entry is inserted in the same critical section that decides to
/// run; there is no suspension between the lookup and the insert, which is
/// what closes the duplicate-refresh race. The underlying work runs on its
/// own task, so a cancelled waiter never cancels the shared flight.
pub struct Singleflight {
    flights: Mutex<HashMap<i64, FlightSlot>>,
}

impl Singleflight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flights: Mutex::new(HashMap::new()),
        })
    }

    /// Join (or start) the flight for `id`. `work` is only invoked when this
    /// caller is the leader.
    pub async fn run<F, Fut>(self: &Arc<Self>, id: i64, work: F) -> SharedOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedOutcome> + Send + 'static,
    {
        let mut rx = {
            let mut flights = self.flights.lock().expect("flight map poisoned");
            if let Some(rx) = flights.get(&id) {
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                flights.insert(id, rx.clone());

                let this = Arc::clone(self);
                let fut = work();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    // Publish before removing so every queued waiter
                    // observes the value; a caller arriving after removal
                    // starts a fresh flight against the updated store row.
                    let _ = tx.send(Some(outcome));
                    this.flights.lock().expect("flight map poisoned").remove(&id);
                });
                rx
            }
        };

        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // The flight task died without publishing (panic/abort).
                return Err(RefreshFailure::Transient(
                    "refresh flight aborted".to_string(),
                ));
            }
        }
    }

    pub fn in_flight(&self, id: i64) -> bool {
        self.flights
            .lock()
            .expect("flight map poisoned")
            .contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn token(tag: &str) -> RefreshedToken {
        RefreshedToken {
            access_token: tag.to_string(),
            refresh_token: None,
            expires_at: None,
            project_id: None,
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_flight() {
        let flights = Singleflight::new();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run(1, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(token("fresh"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.access_token, "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_run_separate_flights() {
        let flights = Singleflight::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            flights
                .run(2, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(token("t"))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_cancel_the_flight() {
        let flights = Singleflight::new();
        let calls = Arc::new(AtomicU32::new(0));

        let waiter = {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                flights
                    .run(3, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(token("survives"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;

        // The shared flight keeps running; a late joiner gets its result
        // without triggering a second refresh.
        let outcome = flights
            .run(3, || async { panic!("leader already exists") })
            .await
            .unwrap();
        assert_eq!(outcome.access_token, "survives");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_shared_and_flight_is_cleared() {
        let flights = Singleflight::new();
        let outcome = flights
            .run(4, || async {
                Err(RefreshFailure::Terminal("revoked".to_string()))
            })
            .await;
        assert!(matches!(outcome, Err(RefreshFailure::Terminal(_))));
        assert!(!flights.in_flight(4));
    }
}
