//! Error Types
//!
//! The typed error side of the crate's two-level failure model: validation
//! paths return [`PostFxError`] through [`Result`], while the effect-level
//! entry points (`blur`, `tick_and_apply_camera_post_process`, ...) fold
//! errors into [`DrawResultFlags`](crate::gpu::DrawResultFlags) and keep
//! going where the frame can still be presented.

use thiserror::Error;

use crate::gpu::DrawResultFlags;

/// The main error type for the post-processing core.
#[derive(Error, Debug)]
pub enum PostFxError {
    // ========================================================================
    // Kernel parameter validation
    // ========================================================================
    /// Gaussian sigma must be strictly positive.
    #[error("Blur sigma must be > 0 (got {0})")]
    InvalidSigma(f32),

    /// Kernel radius outside the supported `(0, 2048]` range.
    #[error("Blur radius out of range (got {0}, supported range is (0, 2048])")]
    InvalidRadius(i32),

    /// Radius/sigma combination outside the sanity band `(sigma, 12*sigma)`.
    #[error("Blur radius {radius} incompatible with sigma {sigma} (expected sigma < radius < 12*sigma)")]
    InvalidKernelRatio {
        /// The requested (or defaulted) radius.
        radius: i32,
        /// The clamped sigma.
        sigma: f32,
    },

    // ========================================================================
    // Source validation
    // ========================================================================
    /// The tonemapper does not support multisampled sources.
    #[error("Multisampled source images are unsupported (sample count {0})")]
    UnsupportedMultisampledSource(u32),

    // ========================================================================
    // Execution substrate
    // ========================================================================
    /// The requested module/entry point is not in the shader library.
    #[error("Shader entry point not found: {module}::{entry}")]
    ShaderEntryNotFound {
        /// Shader module name.
        module: String,
        /// Entry point within the module.
        entry: String,
    },

    /// Background kernel compilation failed.
    #[error("Shader compilation failed for {module}::{entry}: {reason}")]
    ShaderCompileFailed {
        /// Shader module name.
        module: String,
        /// Entry point within the module.
        entry: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// A surface handle no longer refers to a live surface (stale generation).
    #[error("Surface handle is stale or was never allocated")]
    SurfaceLost,

    /// A kernel handle no longer refers to a live kernel.
    #[error("Kernel handle is stale or was never compiled")]
    KernelLost,

    /// A constant-buffer handle no longer refers to a live buffer.
    #[error("Constant buffer handle is stale or was never allocated")]
    ConstantsLost,

    /// The same surface was bound as both input and output of one pass.
    #[error("Surface bound as both SRV and UAV in a single dispatch")]
    BindingAliased,
}

impl PostFxError {
    /// The flags value this error contributes at the effect-level boundary.
    #[must_use]
    pub fn result_flags(&self) -> DrawResultFlags {
        match self {
            Self::InvalidSigma(_) | Self::InvalidRadius(_) | Self::InvalidKernelRatio { .. } => {
                DrawResultFlags::INVALID_PARAMETER
            }
            Self::UnsupportedMultisampledSource(_) => DrawResultFlags::UNSUPPORTED_INPUT,
            Self::ShaderEntryNotFound { .. }
            | Self::ShaderCompileFailed { .. }
            | Self::SurfaceLost
            | Self::KernelLost
            | Self::ConstantsLost
            | Self::BindingAliased => DrawResultFlags::UNSPECIFIED_ERROR,
        }
    }
}

/// Alias for `Result<T, PostFxError>`.
pub type Result<T> = std::result::Result<T, PostFxError>;
