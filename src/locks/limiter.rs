use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Per-(api-key, client-ip) concurrent-request counter.
///
/// The limit check and the increment are one atomic operation under the
/// shard mutex, so concurrent acquirers can never both pass a full slot.
/// `limit = 0` means unlimited (the slot is still counted so release stays
/// uniform).
pub struct ConcurrencySlots {
    entries: Mutex<HashMap<(i64, String), u32>>,
}

impl ConcurrencySlots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Try-increment-if-below-ceiling; `None` when the key+ip is saturated.
    pub fn try_acquire(
        self: &Arc<Self>,
        api_key_id: i64,
        client_ip: &str,
        limit: u32,
    ) -> Option<SlotGuard> {
        let key = (api_key_id, client_ip.to_string());
        let mut entries = self.entries.lock().expect("slot table poisoned");
        let count = entries.entry(key.clone()).or_insert(0);
        if limit > 0 && *count >= limit {
            return None;
        }
        *count += 1;
        Some(SlotGuard {
            slots: Arc::clone(self),
            key: Some(key),
        })
    }

    fn release(&self, key: &(i64, String)) {
        let mut entries = self.entries.lock().expect("slot table poisoned");
        if let Some(count) = entries.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                entries.remove(key);
            }
        }
    }

    pub fn current(&self, api_key_id: i64, client_ip: &str) -> u32 {
        let entries = self.entries.lock().expect("slot table poisoned");
        entries
            .get(&(api_key_id, client_ip.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// RAII slot; dropping it decrements the concurrent count on every exit
/// path, including cancellation.
pub struct SlotGuard {
    slots: Arc<ConcurrencySlots>,
    key: Option<(i64, String)>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.slots.release(&key);
        }
    }
}

/// Per-api-key sliding-window requests-per-minute limiter. Entries older
/// than the window are evicted on each check. `limit = 0` means unlimited.
pub struct RateWindows {
    windows: Mutex<HashMap<i64, VecDeque<DateTime<Utc>>>>,
    span: Duration,
}

impl RateWindows {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            span: Duration::seconds(60),
        }
    }

    /// Record-and-check: returns `false` when the key is over its
    /// per-minute budget (and does not record the attempt).
    pub fn check(&self, api_key_id: i64, limit: u32, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().expect("rate window table poisoned");
        let window = windows.entry(api_key_id).or_default();

        let horizon = now - self.span;
        while window.front().is_some_and(|t| *t <= horizon) {
            window.pop_front();
        }

        if limit > 0 && window.len() >= limit as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}

impl Default for RateWindows {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_enforce_ceiling_atomically() {
        let slots = ConcurrencySlots::new();
        let a = slots.try_acquire(1, "10.0.0.1", 2);
        let b = slots.try_acquire(1, "10.0.0.1", 2);
        let c = slots.try_acquire(1, "10.0.0.1", 2);
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());

        drop(a);
        assert!(slots.try_acquire(1, "10.0.0.1", 2).is_some());
    }

    #[test]
    fn slots_are_scoped_per_key_and_ip() {
        let slots = ConcurrencySlots::new();
        let _a = slots.try_acquire(1, "10.0.0.1", 1).unwrap();
        assert!(slots.try_acquire(1, "10.0.0.2", 1).is_some());
        assert!(slots.try_acquire(2, "10.0.0.1", 1).is_some());
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let slots = ConcurrencySlots::new();
        let guards: Vec<_> = (0..100)
            .map(|_| slots.try_acquire(1, "ip", 0).unwrap())
            .collect();
        assert_eq!(slots.current(1, "ip"), 100);
        drop(guards);
        assert_eq!(slots.current(1, "ip"), 0);
    }

    #[test]
    fn rate_window_evicts_expired_entries() {
        let windows = RateWindows::new();
        let t = Utc::now();
        assert!(windows.check(1, 2, t));
        assert!(windows.check(1, 2, t + Duration::seconds(1)));
        assert!(!windows.check(1, 2, t + Duration::seconds(2)));

        // After the first entry ages out, a slot frees up.
        assert!(windows.check(1, 2, t + Duration::seconds(61)));
    }

    #[test]
    fn zero_rate_limit_never_rejects() {
        let windows = RateWindows::new();
        let t = Utc::now();
        for i in 0..500 {
            assert!(windows.check(1, 0, t + Duration::milliseconds(i)));
        }
    }
}
