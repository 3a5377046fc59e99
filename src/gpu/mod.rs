//! GPU compute infrastructure.
//!
//! Uses wgpu for cross-platform GPU acceleration (Metal, Vulkan, DX12).
//! Provides device initialization and the f32 matrix-multiply kernel used as
//! the accelerated dot-product path.

pub mod matmul;
pub(crate) mod shaders;

use thiserror::Error;

pub use matmul::GpuKernel;

#[derive(Clone, Debug, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter was found")]
    NoAdapter,
    #[error("failed to acquire GPU device: {0}")]
    RequestDevice(String),
    #[error("{m}x{k} · {k}x{n} exceeds device limits")]
    TooLarge { m: usize, k: usize, n: usize },
    #[error("GPU readback failed: {0}")]
    Readback(String),
}

/// Try to create a wgpu device and queue, along with the adapter name.
pub fn try_create_device() -> Result<(wgpu::Device, wgpu::Queue, String), GpuError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or(GpuError::NoAdapter)?;
    let name = adapter.get_info().name;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("neuroevo-gpu"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .map_err(|e| GpuError::RequestDevice(e.to_string()))?;
    Ok((device, queue, name))
}
