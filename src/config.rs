use crate::device::Device;
use crate::error::Result;
use crate::nn::optim::{Accumulation, Optimizer, OptimizerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime settings for building and training models.
///
/// Every field has a default, so `{}` is a valid config:
///
/// ```
/// use tidegrad::{Accumulation, Device, RuntimeConfig};
///
/// let config = RuntimeConfig::from_json(r#"{"device": {"gpu": "opencl:0"}, "accumulation": "sum"}"#)
///     .unwrap();
/// assert_eq!(config.device, Device::Gpu("opencl:0".into()));
/// assert_eq!(config.accumulation, Accumulation::Sum);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device: Device,
    pub optimizer: OptimizerConfig,
    pub accumulation: Accumulation,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::info!("loaded runtime config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// An unbound optimizer following this config.
    #[must_use]
    pub fn optimizer(&self) -> Optimizer {
        Optimizer::from_config(&self.optimizer).with_accumulation(self.accumulation)
    }
}
