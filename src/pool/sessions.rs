use moka::sync::Cache;
use std::time::Duration;

/// Best-effort binding of client session ids to credentials, so upstream
/// conversational caches are reused. Process-local; entries expire after the
/// configured idle TTL and are extended on each use.
pub struct StickySessions {
    cache: Cache<String, i64>,
}

impl StickySessions {
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs.max(1)))
            .max_capacity(100_000)
            .support_invalidation_closures()
            .build();
        Self { cache }
    }

    /// Look up a live mapping; the read itself extends the TTL.
    pub fn get(&self, session_id: &str) -> Option<i64> {
        self.cache.get(session_id)
    }

    pub fn record(&self, session_id: &str, credential_id: i64) {
        self.cache.insert(session_id.to_string(), credential_id);
    }

    /// Drop every mapping pinned to a removed credential.
    pub fn evict_credential(&self, credential_id: i64) {
        self.cache.invalidate_entries_if(move |_, v| *v == credential_id)
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_get_round_trips() {
        let sessions = StickySessions::new(60);
        sessions.record("sess-1", 7);
        assert_eq!(sessions.get("sess-1"), Some(7));
        assert_eq!(sessions.get("sess-2"), None);
    }

    #[test]
    fn evicting_a_credential_drops_its_sessions() {
        let sessions = StickySessions::new(60);
        sessions.record("a", 1);
        sessions.record("b", 2);
        sessions.evict_credential(1);
        // moka invalidation is applied on subsequent reads.
        sessions.cache.run_pending_tasks();
        assert_eq!(sessions.get("a"), None);
        assert_eq!(sessions.get("b"), Some(2));
    }
}
