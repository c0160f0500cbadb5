use candle_core::{utils, Device};
use tracing::debug;

use crate::error::{DreamError, Result};

// Upper bound when probing accelerator ordinals
const MAX_PROBED_DEVICES: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub description: String,
}

pub fn available_devices() -> Vec<DeviceInfo> {
    let mut devices = vec![DeviceInfo {
        name: "cpu".to_string(),
        description: format!("CPU ({} logical cores)", num_cpus::get()),
    }];

    if utils::cuda_is_available() {
        for ordinal in 0..MAX_PROBED_DEVICES {
            match Device::new_cuda(ordinal) {
                Ok(_) => devices.push(DeviceInfo {
                    name: format!("cuda:{}", ordinal),
                    description: format!("CUDA device {}", ordinal),
                }),
                Err(_) => break,
            }
        }
    }

    if utils::metal_is_available() {
        for ordinal in 0..MAX_PROBED_DEVICES {
            match Device::new_metal(ordinal) {
                Ok(_) => devices.push(DeviceInfo {
                    name: format!("metal:{}", ordinal),
                    description: format!("Metal device {}", ordinal),
                }),
                Err(_) => break,
            }
        }
    }

    debug!("found {} compute devices", devices.len());
    devices
}

/// Parses `cpu`, `cuda:N` or `metal:N` (ordinal defaults to 0).
pub fn device_from_name(name: &str) -> Result<Device> {
    let lowered = name.trim().to_ascii_lowercase();
    let (kind, ordinal) = match lowered.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal = ordinal
                .parse::<usize>()
                .map_err(|_| DreamError::UnknownDevice(name.to_string()))?;
            (kind.to_string(), ordinal)
        }
        None => (lowered.clone(), 0),
    };

    match kind.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Device::new_cuda(ordinal).map_err(|_| DreamError::UnknownDevice(name.to_string())),
        "metal" => Device::new_metal(ordinal).map_err(|_| DreamError::UnknownDevice(name.to_string())),
        _ => Err(DreamError::UnknownDevice(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_listed_first() {
        let devices = available_devices();
        assert_eq!(devices[0].name, "cpu");
        assert!(devices[0].description.contains("logical cores"));
    }

    #[test]
    fn parses_cpu() {
        assert!(device_from_name("cpu").unwrap().is_cpu());
        assert!(device_from_name(" CPU ").unwrap().is_cpu());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(device_from_name("tpu:0"), Err(DreamError::UnknownDevice(_))));
        assert!(matches!(device_from_name("cuda:x"), Err(DreamError::UnknownDevice(_))));
    }
}
