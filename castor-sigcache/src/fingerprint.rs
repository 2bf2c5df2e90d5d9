use ahash::AHasher;
use serde::Serialize;
use std::hash::Hasher;

use crate::SignatureKey;

const DOMAIN_TEXT: u8 = 1;
const DOMAIN_JSON: u8 = 2;

/// Fingerprint a thinking-text payload. Whitespace at the edges is not
/// significant; empty payloads have no fingerprint.
pub fn fingerprint_text(text: impl AsRef<str>) -> Option<SignatureKey> {
    let trimmed = text.as_ref().trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut hasher = AHasher::default();
    hasher.write_u8(DOMAIN_TEXT);
    hasher.write(trimmed.as_bytes());
    Some(hasher.finish())
}

/// Fingerprint a structured payload with canonical key ordering, so
/// serialization order does not change the key.
pub fn fingerprint_json(value: &impl Serialize) -> Option<SignatureKey> {
    let mut normalized = serde_json::to_value(value).ok()?;
    if normalized.is_null() {
        return None;
    }
    normalized.sort_all_objects();
    let bytes = serde_json::to_vec(&normalized).ok()?;

    let mut hasher = AHasher::default();
    hasher.write_u8(DOMAIN_JSON);
    hasher.write(&bytes);
    Some(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_key_order_is_canonical() {
        let lhs = json!({"name": "t", "args": {"a": 1, "b": 2}});
        let rhs = json!({"args": {"b": 2, "a": 1}, "name": "t"});
        assert_eq!(fingerprint_json(&lhs), fingerprint_json(&rhs));
    }

    #[test]
    fn text_is_trimmed() {
        assert_eq!(fingerprint_text("  alpha "), fingerprint_text("alpha"));
    }

    #[test]
    fn empty_text_has_no_fingerprint() {
        assert_eq!(fingerprint_text("   "), None);
    }

    #[test]
    fn text_and_json_domains_do_not_collide() {
        let text = fingerprint_text("\"x\"");
        let json = fingerprint_json(&json!("x"));
        assert_ne!(text, json);
    }
}
