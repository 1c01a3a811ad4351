//! # Device Selection
//!
//! Picks the compute device (CPU/GPU) used for Whisper inference. GPU
//! requests fall back to the CPU when the backend is not compiled in or no
//! device is present.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached result of automatic detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Automatically select the best available device
    #[default]
    Auto,
    Cpu,
    /// CUDA GPU, falls back to CPU if not available
    Cuda,
    /// Metal GPU, falls back to CPU if not available
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => BEST_DEVICE.get_or_init(detect_best_device).clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or_else(|| {
            warn!("CUDA requested but not available, using CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => metal_device().unwrap_or_else(|| {
            warn!("Metal requested but not available, using CPU");
            Device::Cpu
        }),
    }
}

fn detect_best_device() -> Device {
    if let Some(device) = cuda_device() {
        info!("Selected CUDA GPU for inference");
        return device;
    }
    if let Some(device) = metal_device() {
        info!("Selected Metal GPU for inference");
        return device;
    }
    info!("Using CPU for inference (no GPU acceleration available)");
    Device::Cpu
}

fn cuda_device() -> Option<Device> {
    if !candle_core::utils::cuda_is_available() {
        return None;
    }
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    if !candle_core::utils::metal_is_available() {
        return None;
    }
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

/// Short label for logs and the health endpoint.
pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
