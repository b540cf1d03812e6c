use candle_core::Device;

use crate::error::{BenchError, Result};

/// Resolve a device string (`cpu`, `cuda`, `cuda:N`) to a candle device.
///
/// # Errors
///
/// Returns an error if the CUDA device is not available or the device type
/// is not recognised.
pub fn get_device(device_str: &str) -> Result<Device> {
    if device_str.starts_with("cuda") {
        let cuda_index = if device_str == "cuda" {
            0
        } else {
            device_str
                .split(':')
                .nth(1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        let device = Device::cuda_if_available(cuda_index)?;
        if !device.is_cuda() {
            return Err(BenchError::InvalidConfig(format!(
                "CUDA device {} is not available",
                cuda_index
            )));
        }
        Ok(device)
    } else {
        match device_str {
            "cpu" => Ok(Device::Cpu),
            _ => Err(BenchError::InvalidConfig(format!(
                "Unsupported device type: {}",
                device_str
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_and_unknown_devices() {
        assert!(matches!(get_device("cpu"), Ok(Device::Cpu)));
        assert!(get_device("tpu").is_err());
    }
}
