//! Rotating pools of backend credentials and model identifiers.
//!
//! Both pools are drawn from once per invocation attempt, independently of
//! each other, and guard their cursor state with a mutex so concurrent runs
//! in one process never interleave updates.

mod credentials;
mod models;

pub use credentials::{CredentialHealthSnapshot, CredentialPool, CredentialValidity};
pub use models::{ModelPool, ModelSelection};
