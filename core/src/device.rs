//! Compute device selection.

use std::fmt;
use tracing::warn;

/// Environment variable that hides GPUs from CUDA-aware libraries.
pub const CUDA_VISIBILITY_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Where training steps execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Host CPU, kernels parallelized with rayon.
    Cpu,
}

impl Device {
    /// Label used in throughput lines (`img/sec per CPU`).
    pub fn label(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
        }
    }

    /// Picks the device for a run.
    ///
    /// Only host kernels are compiled in, so a CUDA request falls back to the CPU.
    pub fn resolve(cuda_requested: bool) -> Device {
        if cuda_requested {
            warn!("CUDA requested but no GPU backend is available, falling back to CPU");
        }
        Device::Cpu
    }

    /// The environment entry that hides GPUs when CUDA is disabled.
    ///
    /// Setting it is left to the binary, before any worker thread exists.
    pub fn cuda_env(no_cuda: bool) -> Option<(&'static str, &'static str)> {
        no_cuda.then_some((CUDA_VISIBILITY_VAR, "-1"))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
