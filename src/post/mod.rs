//! Post-processing effects: separable blur, luminance reduction, and the
//! tonemap compositor, plus the kernel library they dispatch.

pub mod blur;
pub mod kernel;
pub mod luminance;
pub mod shaders;
pub mod tonemap;

pub use blur::PostProcessBlur;
pub use kernel::{BlurTap, KernelOptimizer};
pub use luminance::LuminanceReducer;
pub use tonemap::{AdditionalParams, PostProcessTonemap};
