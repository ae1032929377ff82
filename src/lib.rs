//! HDR post-processing core.
//!
//! Takes a pre-tonemap radiance image to display color: an adaptive
//! separable Gaussian blur with bilinear tap compression, a two-stage
//! average log-luminance reduction driving camera auto-exposure, optional
//! bloom, and a modified-Reinhard tonemap curve. Execution runs on a
//! deterministic software device behind the same narrow interface a GPU
//! backend would implement.
//!
//! ```no_run
//! use ember_post::{AdditionalParams, PostProcessTonemap, RenderCamera, create_device};
//! use ember_post::gpu::{BindFlags, SurfaceDesc, SurfaceFormat};
//!
//! let mut device = create_device();
//! let desc = SurfaceDesc::new(
//!     SurfaceFormat::Rgba32Float,
//!     1280,
//!     720,
//!     BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS | BindFlags::RENDER_TARGET,
//! );
//! let radiance = device.surfaces_mut().create_2d(desc);
//! let output = device.surfaces_mut().create_2d(desc);
//!
//! let mut camera = RenderCamera::new();
//! let mut tonemap = PostProcessTonemap::new(&mut device);
//! let flags = tonemap.tick_and_apply_camera_post_process(
//!     &mut device,
//!     &mut camera,
//!     1.0 / 60.0,
//!     output,
//!     radiance,
//!     &AdditionalParams::default(),
//! );
//! assert!(flags.is_empty());
//! ```

pub mod camera;
pub mod errors;
pub mod gpu;
pub mod post;

pub use camera::{
    BloomSettings, ExposureSettings, GeneralSettings, RenderCamera, RenderCameraSettings,
    TonemapSettings,
};
pub use errors::PostFxError;
pub use gpu::{Device, DrawResultFlags, SurfaceKey};
pub use post::{AdditionalParams, KernelOptimizer, PostProcessBlur, PostProcessTonemap};

/// Build a device preloaded with the post-processing kernel library.
#[must_use]
pub fn create_device() -> Device {
    Device::new(post::shaders::library())
}
