//! Execution substrate: surfaces, kernels, and the dispatch device.
//!
//! Everything the post-processing core needs from "the GPU", expressed as a
//! narrow interface over generation-counted handles and implemented here in
//! software for determinism.

pub mod context;
pub mod shader;
pub mod surface;

pub use context::{Bindings, BlendMode, ConstantsKey, Device, DrawResultFlags, KernelIo, MAX_BINDING_SLOTS};
pub use shader::{CompiledKernel, ComputeFn, KernelKey, KernelRoutine, PixelFn, ShaderCache, ShaderLibrary};
pub use surface::{BindFlags, Surface, SurfaceDesc, SurfaceFormat, SurfaceKey, SurfacePool};
