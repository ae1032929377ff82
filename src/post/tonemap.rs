//! Tonemap compositor
//!
//! Per-frame orchestration turning pre-tonemap HDR radiance into display
//! color: downsample with fused luminance accumulation, luminance reduction
//! feeding camera auto-exposure, optional bloom blurred at half resolution
//! and composited back onto the source, then the final curve pass.
//!
//! Stateless across frames except for cached resources; each step ORs its
//! result flags and later cosmetic steps are skipped once anything failed,
//! but already-issued work is never rolled back.

use glam::UVec2;

use crate::camera::RenderCamera;
use crate::errors::PostFxError;
use crate::gpu::{
    BindFlags, Bindings, BlendMode, ConstantsKey, Device, DrawResultFlags, KernelKey, SurfaceDesc,
    SurfaceKey,
};

use super::blur::PostProcessBlur;
use super::luminance::LuminanceReducer;
use super::shaders::{TONEMAP_MODULE, TonemapConstants};

/// Per-call options for [`PostProcessTonemap::tick_and_apply_camera_post_process`].
#[derive(Clone, Copy, Default)]
pub struct AdditionalParams {
    /// Skip luminance reduction and the camera exposure push (exposure
    /// manually pinned this frame).
    pub skip_camera_luminance_update: bool,
    /// Skip the tonemap curve; `src` is copied to `dst` unchanged.
    pub skip_tonemapper: bool,
    /// Full-res R32 surface receiving `ln(L)` of the pre-curve luminance.
    pub out_export_luma: Option<SurfaceKey>,
}

/// The tonemap/auto-exposure/bloom compositor.
///
/// Owns its half-res and luminance buffers and a [`PostProcessBlur`] by
/// composition; single render-thread ownership, like the rest of the core.
pub struct PostProcessTonemap {
    blur: PostProcessBlur,
    luminance: LuminanceReducer,
    constants: ConstantsKey,
    ps_tonemap: KernelKey,
    ps_tonemap_luma_export: KernelKey,
    ps_add_bloom: KernelKey,
    ps_pass_through: KernelKey,
    half_res: Option<SurfaceKey>,
    half_size: UVec2,
}

impl PostProcessTonemap {
    #[must_use]
    pub fn new(device: &mut Device) -> Self {
        Self {
            blur: PostProcessBlur::new(device),
            luminance: LuminanceReducer::new(device),
            constants: device.create_constants("tonemap"),
            ps_tonemap: device.compile_kernel(TONEMAP_MODULE, "ps_tonemap", &[]),
            ps_tonemap_luma_export: device.compile_kernel(TONEMAP_MODULE, "ps_tonemap_luma_export", &[]),
            ps_add_bloom: device.compile_kernel(TONEMAP_MODULE, "ps_add_bloom", &[]),
            ps_pass_through: device.compile_kernel(TONEMAP_MODULE, "ps_pass_through", &[]),
            half_res: None,
            half_size: UVec2::ZERO,
        }
    }

    /// The half-resolution radiance surface from the last invocation.
    #[must_use]
    pub fn half_res(&self) -> Option<SurfaceKey> {
        self.half_res
    }

    /// Run the whole per-frame pipeline: camera tick, downsample, luminance
    /// reduction and exposure push, bloom, and the final curve from `src`
    /// into `dst`.
    ///
    /// A multisampled `src` is rejected before anything is ticked,
    /// reallocated, or dispatched. All other failures accumulate into the
    /// returned flags; cosmetic steps downstream of a failure are skipped.
    pub fn tick_and_apply_camera_post_process(
        &mut self,
        device: &mut Device,
        camera: &mut RenderCamera,
        delta_time: f32,
        dst: SurfaceKey,
        src: SurfaceKey,
        additional: &AdditionalParams,
    ) -> DrawResultFlags {
        // 1. Validate.
        let Some(surface) = device.surfaces().get(src) else {
            return DrawResultFlags::UNSPECIFIED_ERROR;
        };
        let src_desc = *surface.desc();
        if src_desc.sample_count != 1 {
            log::warn!("tonemap source is multisampled ({}x)", src_desc.sample_count);
            return PostFxError::UnsupportedMultisampledSource(src_desc.sample_count).result_flags();
        }

        camera.tick(delta_time);

        // 2. Resource sync.
        let half_size = UVec2::new(src_desc.width.div_ceil(2), src_desc.height.div_ceil(2));
        self.half_res = Some(device.surfaces_mut().create_or_resize_2d(
            self.half_res,
            SurfaceDesc::new(
                src_desc.format,
                half_size.x,
                half_size.y,
                BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
            ),
        ));
        self.half_size = half_size;
        self.luminance.sync_resources(device, half_size);

        self.upload_constants(device, camera, &src_desc);
        let half_res = self.half_res.unwrap_or_default();

        // 3. Downsample with fused partial luminance.
        let mut flags =
            self.luminance
                .dispatch_downsample(device, self.constants, src, half_res, half_size);

        // 4. Luminance reduction and camera exposure push.
        if !additional.skip_camera_luminance_update {
            flags |= self.luminance.reduce(device, self.constants);
            if flags == DrawResultFlags::NONE {
                if let Some(result) = self.luminance.result() {
                    camera.update_luminance(device, result);
                }
            }
        }

        let settings = camera.settings;
        let do_bloom = settings.bloom.use_bloom && settings.general.enable_post_process;

        // 5. Bloom blur at half resolution.
        let mut bloom_flags = DrawResultFlags::NONE;
        if do_bloom {
            let extent = if camera.y_fov_main {
                src_desc.height
            } else {
                src_desc.width
            };
            let bloom_size = settings.bloom.bloom_size * extent as f32 / 100.0;
            bloom_flags = self.blur.blur_to_scratch(device, half_res, bloom_size * 0.5, -1);
            flags |= bloom_flags;
        }

        // 6. Composite bloom onto the full-res radiance.
        if do_bloom && bloom_flags == DrawResultFlags::NONE && flags == DrawResultFlags::NONE {
            if let Some(scratch) = self.blur.last_scratch() {
                let mut bindings = Bindings::new();
                bindings.constants = Some(self.constants);
                bindings.srvs[0] = Some(scratch);
                flags |= device.dispatch_fullscreen(self.ps_add_bloom, &bindings, BlendMode::Additive, src);
            }
        }

        // 7. Final curve; degrades to a pass-through copy when the curve is
        // skipped or post-processing is disabled.
        if flags != DrawResultFlags::NONE {
            return flags;
        }
        let mut bindings = Bindings::new();
        bindings.constants = Some(self.constants);
        bindings.srvs[0] = Some(src);
        let kernel = if !settings.general.enable_post_process || additional.skip_tonemapper {
            self.ps_pass_through
        } else if let Some(export) = additional.out_export_luma {
            bindings.uavs[0] = Some(export);
            self.ps_tonemap_luma_export
        } else {
            self.ps_tonemap
        };
        flags |= device.dispatch_fullscreen(kernel, &bindings, BlendMode::Opaque, dst);
        flags
    }

    fn upload_constants(&mut self, device: &mut Device, camera: &RenderCamera, src_desc: &SurfaceDesc) {
        let settings = &camera.settings;
        let pre_exposure = camera.pre_exposure_multiplier(true);
        let white_level = if settings.tonemap.use_modified_reinhard {
            settings.tonemap.modified_reinhard_white_level
        } else {
            f32::MAX
        };
        let consts = TonemapConstants {
            viewport_pixel_size: [
                1.0 / src_desc.width as f32,
                1.0 / src_desc.height as f32,
            ],
            bloom_sample_uv_mul: [
                1.0 / (self.half_size.x as f32 * 2.0),
                1.0 / (self.half_size.y as f32 * 2.0),
            ],
            exposure: settings.exposure.exposure,
            pre_exposure_multiplier: pre_exposure,
            white_level,
            white_level_squared: white_level * white_level,
            saturation: settings.tonemap.saturation,
            bloom_multiplier: settings.bloom.bloom_multiplier,
            bloom_min_threshold_pe: settings.bloom.bloom_min_threshold * pre_exposure,
            bloom_max_clamp_pe: settings.bloom.bloom_max_clamp * pre_exposure,
            half_res_pixel_count: (self.half_size.x * self.half_size.y) as f32,
            hdr_clamp_pe: settings.exposure.hdr_clamp,
            padding: [0.0; 2],
        };
        device.upload_constants(self.constants, &consts);
    }
}
