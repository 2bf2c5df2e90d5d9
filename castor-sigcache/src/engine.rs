use moka::sync::Cache;
use serde::Serialize;
use std::{sync::Arc, time::Duration};

use crate::fingerprint::{fingerprint_json, fingerprint_text};

pub type SignatureKey = u64;
pub type StoredSignature = Arc<str>;

/// Placeholder accepted by upstream validators when the real signature is
/// no longer available.
const FALLBACK_SIGNATURE: &str = "skip_thought_signature_validator";

/// TTL cache binding reasoning signatures to the content they signed.
///
/// Signatures arrive attached to two kinds of model output: thinking text
/// and tool calls. Each is fingerprinted in its own hash domain, so a tool
/// call whose arguments happen to equal some thinking text can never replay
/// the wrong signature. Callers hand over the content itself; keys never
/// leave this module.
///
/// The fallback placeholder is an output, not an input: `remember` refuses
/// to store it (or empty strings), so an expired entry keeps yielding the
/// placeholder instead of laundering it into a "real" cached signature.
pub struct SignatureCache {
    cache: Cache<SignatureKey, StoredSignature>,
    fallback: StoredSignature,
}

impl SignatureCache {
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .max_capacity(max_capacity.max(1))
            .build();

        Self {
            cache,
            fallback: Arc::from(FALLBACK_SIGNATURE),
        }
    }

    fn store(&self, key: Option<SignatureKey>, signature: &str) -> bool {
        let signature = signature.trim();
        if signature.is_empty() || signature == FALLBACK_SIGNATURE {
            return false;
        }
        let Some(key) = key else {
            return false;
        };
        self.cache.insert(key, Arc::from(signature));
        true
    }

    /// Bind a signature to the thinking text it signed. Returns whether the
    /// entry was stored.
    pub fn remember(&self, thinking: &str, signature: &str) -> bool {
        self.store(fingerprint_text(thinking), signature)
    }

    /// Bind a signature to a signed tool call (name + arguments).
    pub fn remember_call(&self, call: &impl Serialize, signature: &str) -> bool {
        self.store(fingerprint_json(call), signature)
    }

    /// Signature previously seen for this thinking text, if still live.
    pub fn recall(&self, thinking: &str) -> Option<StoredSignature> {
        fingerprint_text(thinking).and_then(|key| self.cache.get(&key))
    }

    /// Signature previously seen for this tool call, if still live.
    pub fn recall_call(&self, call: &impl Serialize) -> Option<StoredSignature> {
        fingerprint_json(call).and_then(|key| self.cache.get(&key))
    }

    /// Recall, degrading to the validator-skip placeholder when the entry
    /// has expired or was never seen.
    pub fn recall_or_fallback(&self, thinking: &str) -> StoredSignature {
        self.recall(thinking).unwrap_or_else(|| self.fallback())
    }

    pub fn recall_call_or_fallback(&self, call: &impl Serialize) -> StoredSignature {
        self.recall_call(call).unwrap_or_else(|| self.fallback())
    }

    pub fn fallback(&self) -> StoredSignature {
        self.fallback.clone()
    }
}
