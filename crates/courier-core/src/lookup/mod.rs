//! Lookup - 外部 lookup adapter の failover
//!
//! - **registry**: adapter と記述子（priority / enabled / 設定）
//! - **executor**: adapter 単位の再試行（`with_retry`）
//! - **router**: 優先度順の failover
//! - **vin**: VIN による車型照会の型

pub mod error;
pub mod executor;
pub mod registry;
pub mod router;
pub mod vin;

#[cfg(test)]
pub(crate) mod fixtures;

pub use self::error::{AdapterError, AdapterFailure, LookupError, RegistryError};
pub use self::executor::{
    AttemptPolicy, MAX_RETRY_COUNT, RETRY_INTERVAL, RetryError, RetryingExecutor, with_retry,
};
pub use self::registry::{AdapterDescriptor, AdapterRegistry, Candidate};
pub use self::router::{FailoverRouter, Routed};
pub use self::vin::{
    VehicleModel, VinAdapterRegistry, VinCode, VinError, VinLookupAdapter, VinQueryResult,
    VinRouter,
};
