//! Compute device selection
//!
//! A device is chosen once per model load and the model stays on it for the
//! lifetime of the process.

use crate::error::{InferenceError, InferenceResult};
use candle_core::{Device, DeviceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Which device models should be placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// First available accelerator (CUDA, then Metal), else CPU
    #[default]
    Auto,
    /// Always the CPU
    Cpu,
    /// CUDA device 0; failing to open it is an error
    Cuda,
    /// Metal device 0; failing to open it is an error
    Metal,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(InferenceError::Configuration(format!(
                "invalid device '{other}' (expected auto, cpu, cuda or metal)"
            ))),
        }
    }
}

impl DevicePreference {
    /// Create the device for this preference
    pub fn create_device(self) -> InferenceResult<Device> {
        match self {
            Self::Cpu => {
                info!("Using CPU device for inference");
                Ok(Device::Cpu)
            }
            Self::Cuda => {
                info!("Initializing CUDA device for inference");
                Device::new_cuda(0).map_err(|e| {
                    InferenceError::Device(format!("CUDA device initialization failed: {e}"))
                })
            }
            Self::Metal => {
                info!("Initializing Metal device for inference");
                Device::new_metal(0).map_err(|e| {
                    InferenceError::Device(format!("Metal device initialization failed: {e}"))
                })
            }
            Self::Auto => {
                if candle_core::utils::cuda_is_available() {
                    match Device::new_cuda(0) {
                        Ok(device) => {
                            info!("Selected CUDA device 0");
                            return Ok(device);
                        }
                        Err(e) => warn!("CUDA reported available but failed to open: {}", e),
                    }
                }
                if candle_core::utils::metal_is_available() {
                    match Device::new_metal(0) {
                        Ok(device) => {
                            info!("Selected Metal device 0");
                            return Ok(device);
                        }
                        Err(e) => warn!("Metal reported available but failed to open: {}", e),
                    }
                }
                info!("No accelerator available, using CPU");
                Ok(Device::Cpu)
            }
        }
    }
}

/// Short label for a device, e.g. `cpu` or `cuda:0`
#[must_use]
pub fn device_label(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{gpu_id}"),
        DeviceLocation::Metal { gpu_id } => format!("metal:{gpu_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preference() {
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_device() {
        let device = DevicePreference::Cpu.create_device().unwrap();
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn test_auto_always_yields_a_device() {
        assert!(DevicePreference::Auto.create_device().is_ok());
    }
}
