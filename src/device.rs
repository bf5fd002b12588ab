// ===== DEVICE ENUM =====

use serde::{Deserialize, Serialize};

/// Compute device a kernel is built for.
///
/// Kernels resolve their numeric routines from the device once, at construction.
/// No GPU backend is compiled into this crate, so `Gpu` requests resolve to the
/// CPU routines with a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Gpu(String),
}

impl Device {
    #[must_use]
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    #[must_use]
    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Device::Cpu => "CPU",
            Device::Gpu(name) => name,
        }
    }

    /// Resolve a routine for this device, falling back to the CPU routine.
    pub(crate) fn resolve<T>(&self, kernel: &str, cpu: T) -> T {
        if let Device::Gpu(name) = self {
            log::warn!("no GPU backend compiled in; `{kernel}` on {name} runs on CPU");
        }
        cpu
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        let gpu = Device::Gpu("opencl:0".to_string());
        assert!(gpu.is_gpu());
        assert!(!gpu.is_cpu());
        assert_eq!(gpu.name(), "opencl:0");
    }

    #[test]
    fn test_gpu_resolves_to_cpu_routine() {
        fn cpu_routine(x: f32) -> f32 {
            x * 2.0
        }
        let f: fn(f32) -> f32 = Device::Gpu("cuda".into()).resolve("double", cpu_routine);
        assert_eq!(f(2.0), 4.0);
    }
}
