//! Separable Gaussian blur effect
//!
//! Two-pass blur over pooled ping/pong surfaces matched to the source's size
//! and format. Surfaces are reallocated only when the source diverges from
//! the cached descriptor; the tap table is re-uploaded only when the kernel
//! or the surface size changed.

use glam::UVec2;

use crate::errors::PostFxError;
use crate::gpu::{
    BindFlags, Bindings, ConstantsKey, Device, DrawResultFlags, KernelKey, SurfaceDesc, SurfaceKey,
};

use super::kernel::KernelOptimizer;
use super::shaders::{BLUR_MODULE, BlurConstants, MAX_BLUR_TAPS, POSTFX_GROUP_SIZE};

/// The blur effect.
///
/// `blur_to_scratch` leaves the result in an internally owned surface that
/// stays valid until the next call on this instance; `blur` writes the
/// caller's destination and invalidates any previous scratch result.
pub struct PostProcessBlur {
    kernel: KernelOptimizer,
    cs_horizontal: KernelKey,
    cs_vertical: KernelKey,
    constants: ConstantsKey,
    constants_dirty: bool,
    /// Scratch pair; `ping` doubles as the `blur_to_scratch` result.
    ping: Option<SurfaceKey>,
    pong: Option<SurfaceKey>,
    cached_desc: Option<SurfaceDesc>,
    resource_updates: u64,
    last_scratch: Option<SurfaceKey>,
}

impl PostProcessBlur {
    #[must_use]
    pub fn new(device: &mut Device) -> Self {
        Self {
            kernel: KernelOptimizer::new(),
            cs_horizontal: device.compile_kernel(BLUR_MODULE, "cs_gauss_horizontal", &[]),
            cs_vertical: device.compile_kernel(BLUR_MODULE, "cs_gauss_vertical", &[]),
            constants: device.create_constants("blur"),
            constants_dirty: true,
            ping: None,
            pong: None,
            cached_desc: None,
            resource_updates: 0,
            last_scratch: None,
        }
    }

    /// Blur `src` into `dst` with the given Gaussian. `radius == -1` derives
    /// the radius from sigma. Invalidates the last scratch result; a
    /// rejected parameter leaves it (and all other engine state) intact.
    pub fn blur(
        &mut self,
        device: &mut Device,
        dst: SurfaceKey,
        src: SurfaceKey,
        sigma: f32,
        radius: i32,
    ) -> DrawResultFlags {
        self.blur_impl(device, Some(dst), src, sigma, radius)
    }

    /// Blur `src` into the internal scratch surface; retrieve it with
    /// [`last_scratch`](Self::last_scratch). The result stays valid until
    /// the next `blur`/`blur_to_scratch` call.
    pub fn blur_to_scratch(
        &mut self,
        device: &mut Device,
        src: SurfaceKey,
        sigma: f32,
        radius: i32,
    ) -> DrawResultFlags {
        let flags = self.blur_impl(device, None, src, sigma, radius);
        if flags == DrawResultFlags::NONE {
            self.last_scratch = self.ping;
        }
        flags
    }

    /// The surface written by the last successful `blur_to_scratch`, if it
    /// is still valid.
    #[must_use]
    pub fn last_scratch(&self) -> Option<SurfaceKey> {
        self.last_scratch
    }

    /// Number of times the scratch pair has been (re)allocated.
    #[must_use]
    pub fn resource_updates(&self) -> u64 {
        self.resource_updates
    }

    /// `dst == None` targets the internal scratch (ping) surface.
    fn blur_impl(
        &mut self,
        device: &mut Device,
        dst: Option<SurfaceKey>,
        src: SurfaceKey,
        sigma: f32,
        radius: i32,
    ) -> DrawResultFlags {
        let Some(surface) = device.surfaces().get(src) else {
            return DrawResultFlags::UNSPECIFIED_ERROR;
        };
        let src_desc = *surface.desc();
        if src_desc.sample_count != 1 {
            log::warn!("blur source is multisampled ({}x)", src_desc.sample_count);
            return PostFxError::UnsupportedMultisampledSource(src_desc.sample_count).result_flags();
        }

        // Validate before touching any engine state; a rejected parameter
        // must leave kernel tables, scratch surfaces, and the last scratch
        // result untouched.
        match self.kernel.update(sigma, radius) {
            Ok(changed) => self.constants_dirty |= changed,
            Err(err) => {
                log::warn!("blur parameters rejected: {err}");
                return err.result_flags();
            }
        }
        self.last_scratch = None;

        self.update_surfaces(device, &src_desc);
        let dst = match dst {
            Some(dst) => dst,
            None => self.ping.unwrap_or_default(),
        };

        if self.constants_dirty {
            self.upload_constants(device, &src_desc);
        }

        let groups = UVec2::new(
            src_desc.width.div_ceil(POSTFX_GROUP_SIZE),
            src_desc.height.div_ceil(POSTFX_GROUP_SIZE),
        );
        let pong = self.pong.unwrap_or_default();

        let mut bindings = Bindings::new();
        bindings.constants = Some(self.constants);
        bindings.srvs[0] = Some(src);
        bindings.uavs[0] = Some(pong);
        let mut flags = device.dispatch_compute(self.cs_horizontal, groups, &bindings);

        bindings.srvs[0] = Some(pong);
        bindings.uavs[0] = Some(dst);
        flags |= device.dispatch_compute(self.cs_vertical, groups, &bindings);
        flags
    }

    /// Match the scratch pair to the source's size and format; no-op when
    /// nothing changed.
    fn update_surfaces(&mut self, device: &mut Device, src_desc: &SurfaceDesc) {
        let desc = SurfaceDesc::new(
            src_desc.format,
            src_desc.width,
            src_desc.height,
            BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
        );
        if self.cached_desc == Some(desc) {
            return;
        }
        self.ping = Some(device.surfaces_mut().create_or_resize_2d(self.ping, desc));
        self.pong = Some(device.surfaces_mut().create_or_resize_2d(self.pong, desc));
        self.cached_desc = Some(desc);
        self.resource_updates += 1;
        self.constants_dirty = true;
        self.last_scratch = None;
    }

    fn upload_constants(&mut self, device: &mut Device, src_desc: &SurfaceDesc) {
        let mut consts = BlurConstants {
            pixel_size: [
                1.0 / src_desc.width as f32,
                1.0 / src_desc.height as f32,
            ],
            factor0: 1.0,
            tap_count: self.kernel.taps().len().min(MAX_BLUR_TAPS) as u32,
            taps: [[0.0; 4]; MAX_BLUR_TAPS],
        };
        for (slot, tap) in consts.taps.iter_mut().zip(self.kernel.taps()) {
            slot[0] = tap.offset;
            slot[1] = tap.weight;
        }
        device.upload_constants(self.constants, &consts);
        self.constants_dirty = false;
    }
}
