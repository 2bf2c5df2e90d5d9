use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

const SHARD_COUNT: usize = 16;

struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct Shard {
    entries: Mutex<HashMap<i64, LockState>>,
}

/// Per-credential mutual exclusion with FIFO hand-off.
///
/// At most one request holds a credential at a time; later acquirers queue
/// and are resumed in arrival order. Release happens in the guard's `Drop`,
/// so it fires on every exit path including panics and cancellation. A
/// waiter that is cancelled simply drops its queue slot; release skips it.
///
/// `disabled` removes the serialization entirely (the upstream may then
/// reject concurrent use of one token; at your own risk).
pub struct CredentialLocks {
    shards: Vec<Shard>,
    disabled: bool,
}

impl CredentialLocks {
    pub fn new(disabled: bool) -> Arc<Self> {
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard {
                entries: Mutex::new(HashMap::new()),
            })
            .collect();
        Arc::new(Self { shards, disabled })
    }

    fn shard(&self, id: i64) -> &Shard {
        let index = usize::try_from(id.rem_euclid(SHARD_COUNT as i64)).unwrap_or(0);
        &self.shards[index]
    }

    /// Acquire the lock for `id`, waiting FIFO behind the current holder.
    pub async fn acquire(self: &Arc<Self>, id: i64) -> CredentialLockGuard {
        if self.disabled {
            return CredentialLockGuard { owner: None };
        }

        let receiver = {
            let shard = self.shard(id);
            let mut entries = shard.entries.lock().expect("credential lock shard poisoned");
            let state = entries.entry(id).or_insert_with(|| LockState {
                held: false,
                waiters: VecDeque::new(),
            });
            if state.held {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else {
                state.held = true;
                None
            }
        };

        if let Some(rx) = receiver {
            // The holder hands the lock off directly; an Err here means the
            // lock table itself was torn down, in which case proceeding
            // unserialized is the only option left.
            let _ = rx.await;
        }

        CredentialLockGuard {
            owner: Some((Arc::clone(self), id)),
        }
    }

    fn release(&self, id: i64) {
        let shard = self.shard(id);
        let mut entries = shard.entries.lock().expect("credential lock shard poisoned");
        let Some(state) = entries.get_mut(&id) else {
            return;
        };

        // Hand off to the first waiter still listening; cancelled waiters
        // have dropped their receiver and are skipped.
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }

        state.held = false;
        if state.waiters.is_empty() {
            entries.remove(&id);
        }
    }

    #[cfg(test)]
    fn queue_len(&self, id: i64) -> usize {
        let shard = self.shard(id);
        let entries = shard.entries.lock().unwrap();
        entries.get(&id).map_or(0, |s| s.waiters.len())
    }
}

/// RAII guard; dropping it releases the lock and resumes the next waiter.
pub struct CredentialLockGuard {
    owner: Option<(Arc<CredentialLocks>, i64)>,
}

impl Drop for CredentialLockGuard {
    fn drop(&mut self) {
        if let Some((locks, id)) = self.owner.take() {
            locks.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lock_is_exclusive_until_dropped() {
        let locks = CredentialLocks::new(false);
        let guard = locks.acquire(1).await;

        let locks2 = Arc::clone(&locks);
        let second = tokio::spawn(async move { locks2.acquire(1).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(guard);
        let _guard2 = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second acquirer timed out")
            .expect("task panicked");
    }

    #[tokio::test]
    async fn waiters_resume_in_fifo_order() {
        let locks = CredentialLocks::new(false);
        let guard = locks.acquire(7).await;

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        for tag in [1u8, 2, 3] {
            let locks = Arc::clone(&locks);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(7).await;
                let _ = order_tx.send(tag);
            });
            // Ensure queue order matches spawn order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(locks.queue_len(7), 3);

        drop(guard);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(
                tokio::time::timeout(Duration::from_secs(1), order_rx.recv())
                    .await
                    .expect("waiter starved")
                    .expect("channel closed"),
            );
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cancelled_waiter_is_skipped() {
        let locks = CredentialLocks::new(false);
        let guard = locks.acquire(3).await;

        let locks2 = Arc::clone(&locks);
        let cancelled = tokio::spawn(async move {
            let _g = locks2.acquire(3).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancelled.abort();
        let _ = cancelled.await;

        let locks3 = Arc::clone(&locks);
        let live = tokio::spawn(async move { locks3.acquire(3).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(guard);
        let _guard = tokio::time::timeout(Duration::from_secs(1), live)
            .await
            .expect("live waiter starved")
            .expect("task panicked");
    }

    #[tokio::test]
    async fn disabled_locks_admit_concurrent_holders() {
        let locks = CredentialLocks::new(true);
        let _a = locks.acquire(1).await;
        let _b = locks.acquire(1).await;
    }
}
