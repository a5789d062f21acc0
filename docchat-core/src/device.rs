use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::DocchatError;

/// Where model inference should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    /// Value for Ollama's `num_gpu` option. `None` lets the backend offload as it sees fit.
    pub fn ollama_num_gpu(self) -> Option<u32> {
        match self {
            Device::Cpu => Some(0),
            Device::Gpu => None,
        }
    }
}

impl FromStr for Device {
    type Err = DocchatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" | "cuda" => Ok(Device::Gpu),
            other => Err(DocchatError::InvalidConfig(format!(
                "unknown device '{other}', expected 'cpu' or 'gpu'"
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu => f.write_str("gpu"),
        }
    }
}
