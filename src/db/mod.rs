pub mod models;
pub mod patch;
pub mod schema;

mod actor;

pub use actor::{DbActorHandle, spawn};
pub use patch::{ApiKeyCreate, CredentialCreate, CredentialPatch, HealthFlush, RequestLogCreate};
