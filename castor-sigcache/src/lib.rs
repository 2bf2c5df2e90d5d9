//! TTL cache for model reasoning signatures.
//!
//! Providers that emit signed thinking blocks and tool calls require the
//! signature to be replayed on follow-up turns. The gateway binds each
//! signature to a stable fingerprint of the content it signed so
//! sticky-session continuations can re-attach it without persisting
//! reasoning content.

mod engine;
mod fingerprint;

pub use engine::{SignatureCache, SignatureKey, StoredSignature};
pub use fingerprint::{fingerprint_json, fingerprint_text};
