//! Device placement for tensors and sequence-info side tables

use std::fmt;

/// Device class, the granularity at which operators declare support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

/// A concrete device: class plus ordinal.
///
/// ROCm devices report as `cuda`, the same way HIP builds of the usual
/// frameworks do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// GPU with device index
    Cuda(usize),
}

impl Device {
    /// The device class.
    #[must_use]
    pub const fn kind(self) -> DeviceKind {
        match self {
            Self::Cpu => DeviceKind::Cpu,
            Self::Cuda(_) => DeviceKind::Cuda,
        }
    }

    /// Whether this is a CPU device.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// GPU ordinal, if applicable.
    #[must_use]
    pub const fn cuda_index(self) -> Option<usize> {
        match self {
            Self::Cuda(idx) => Some(idx),
            Self::Cpu => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// Render a device-class set for diagnostics: `{cuda}`
#[must_use]
pub fn format_device_kinds(kinds: &[DeviceKind]) -> String {
    let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
    format!("{{{}}}", names.join(", "))
}
