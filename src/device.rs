//! Explicit device placement for context-aware attention modules.
//!
//! Placement is part of the module configuration rather than process-wide
//! state: callers pick a [`DeviceSelection`] and the module is built on the
//! resolved device for its whole lifetime. [`DeviceSelection::Auto`] keeps the
//! "accelerator if available, else CPU" behaviour for callers that want it.

use candle_core::{Device, Result};
use serde::Deserialize;

/// Setting this variable forces [`DeviceSelection::Auto`] onto the CPU.
pub const FORCE_CPU_ENV: &str = "CANDLE_FORCE_CPU";

/// Where module parameters and computation live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    /// Host CPU.
    #[default]
    Cpu,
    /// CUDA device with the given ordinal.
    Cuda(usize),
    /// Metal device with the given ordinal.
    Metal(usize),
    /// First available accelerator (Metal, then CUDA), otherwise the CPU.
    Auto,
}

impl DeviceSelection {
    /// Resolve the selection into a concrete candle device.
    ///
    /// Explicit accelerator selections fail when the backend is unavailable;
    /// only [`DeviceSelection::Auto`] falls back to the CPU.
    pub fn resolve(&self) -> Result<Device> {
        match self {
            DeviceSelection::Cpu => Ok(Device::Cpu),
            DeviceSelection::Cuda(ordinal) => Device::new_cuda(*ordinal),
            DeviceSelection::Metal(ordinal) => Device::new_metal(*ordinal),
            DeviceSelection::Auto => auto_device(),
        }
    }
}

fn auto_device() -> Result<Device> {
    if std::env::var_os(FORCE_CPU_ENV).is_some() {
        log::info!("{FORCE_CPU_ENV} set, using CPU backend");
        return Ok(Device::Cpu);
    }

    let metal = Device::metal_if_available(0)?;
    if metal.is_metal() {
        log::info!("Metal device selected: {:?}", metal.location());
        return Ok(metal);
    }

    let cuda = Device::cuda_if_available(0)?;
    if cuda.is_cuda() {
        log::info!("CUDA device selected: {:?}", cuda.location());
        return Ok(cuda);
    }

    log::info!("no accelerator available, using CPU backend");
    Ok(Device::Cpu)
}
