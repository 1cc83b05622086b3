//! Tensor backend aliases for the graff workspace.

/// CPU backend used for inference and tests.
pub type CpuBackend = burn::backend::NdArray;

/// Autodiff wrapper over the CPU backend, used for training.
pub type AutodiffCpuBackend = burn::backend::Autodiff<CpuBackend>;

/// Default device for the CPU backend.
pub fn cpu_device() -> burn::backend::ndarray::NdArrayDevice {
    burn::backend::ndarray::NdArrayDevice::default()
}

#[cfg(feature = "gpu")]
pub type GpuBackend = burn::backend::Wgpu;

#[cfg(feature = "gpu")]
pub fn gpu_device() -> burn::backend::wgpu::WgpuDevice {
    burn::backend::wgpu::WgpuDevice::default()
}
