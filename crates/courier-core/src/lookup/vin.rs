//! VIN lookup - 車両識別番号による車型照会
//!
//! `VinCode` は値オブジェクト（前後空白除去・17 文字・大文字化）。
//! `VinQueryResult` は router の結果を success フラグ付きの値に変換する。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::LookupError;
use super::registry::AdapterRegistry;
use super::router::{FailoverRouter, Routed};
use crate::ports::LookupAdapter;

pub const VIN_LENGTH: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VinError {
    #[error("VIN must not be empty")]
    Empty,

    #[error("VIN must be 17 characters, got {0}")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VinCode(String);

impl VinCode {
    pub fn new(raw: &str) -> Result<Self, VinError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VinError::Empty);
        }
        let len = trimmed.chars().count();
        if len != VIN_LENGTH {
            return Err(VinError::InvalidLength(len));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VinCode {
    type Err = VinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VinCode {
    type Error = VinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<VinCode> for String {
    fn from(value: VinCode) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleModel {
    pub model_code: String,
    pub model_name: String,
    pub brand: String,
    /// 例: "gasoline", "diesel", "hybrid", "electric"
    pub power_type: Option<String>,
}

pub type VinLookupAdapter = dyn LookupAdapter<VinCode, VehicleModel>;
pub type VinAdapterRegistry = AdapterRegistry<VinCode, VehicleModel>;
pub type VinRouter = FailoverRouter<VinCode, VehicleModel>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinQueryResult {
    pub success: bool,
    pub model: Option<VehicleModel>,
    pub adapter: Option<String>,
    pub error_message: Option<String>,
}

impl VinQueryResult {
    pub fn success(model: VehicleModel, adapter: impl Into<String>) -> Self {
        Self {
            success: true,
            model: Some(model),
            adapter: Some(adapter.into()),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            model: None,
            adapter: None,
            error_message: Some(message.into()),
        }
    }

    pub fn from_lookup(result: Result<Routed<VehicleModel>, LookupError>) -> Self {
        match result {
            Ok(routed) => Self::success(routed.value, routed.adapter),
            Err(err) => Self::failure(err.to_string()),
        }
    }
}
