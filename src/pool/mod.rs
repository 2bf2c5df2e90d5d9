pub mod actor;
pub mod health;
pub mod quota;
pub mod scheduler;
pub mod sessions;

pub use actor::{AcquireRequest, PoolHandle, RequestOutcome};
pub use quota::{ModelQuota, QuotaSnapshot};
