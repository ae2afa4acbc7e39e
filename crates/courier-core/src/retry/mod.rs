//! Retry - per-topic retry policy and its lookup table.

pub mod policy;
pub mod store;

pub use self::policy::RetryPolicy;
pub use self::store::{DEFAULT_POLICY_KEY, RetryPolicyStore};
