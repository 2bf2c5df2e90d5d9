mod credential;
mod limiter;

pub use credential::{CredentialLockGuard, CredentialLocks};
pub use limiter::{ConcurrencySlots, RateWindows, SlotGuard};
