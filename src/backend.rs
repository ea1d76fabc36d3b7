//! Compile-time backend selection.
//!
//! `cuda` swaps the NdArray CPU backend for CubeCL's CUDA runtime; everything
//! else in the crate is generic over `Backend` and only names these aliases at
//! the binary boundary.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn::backend::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("enable one of the `cuda`, `ndarray` or `cpu` features");

/// Autodiff wrapper used for every training run
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device type of the selected backend
pub type Device = <DefaultBackend as Backend>::Device;

/// Default device, seeded so parameter initialisation is reproducible
pub fn init_device(seed: u64) -> Device {
    let device = Device::default();
    TrainingBackend::seed(seed);
    device
}

/// Human-readable backend name for the run banner
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}
