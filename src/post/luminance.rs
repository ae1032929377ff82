//! Average log-luminance reduction
//!
//! Reduces a half-resolution radiance image to a single scene average
//! log-luminance scalar. Stage A is fused with the bloom downsample: it
//! writes the half-res color and per-tile log-luminance sums into a scratch
//! surface sized to the tile grid. Stage B collapses the scratch rows into
//! column 0, then the column into a 1×1 result.
//!
//! The reduction is invariant to the tiling granularity up to float
//! accumulation order; consumers compare approximately.

use glam::UVec2;

use crate::gpu::{
    BindFlags, Bindings, ConstantsKey, Device, DrawResultFlags, KernelKey, SurfaceDesc,
    SurfaceFormat, SurfaceKey,
};

use super::shaders::{POSTFX_GROUP_SIZE, TONEMAP_MODULE};

const REDUCE_ROW_LANES: u32 = 64;

pub struct LuminanceReducer {
    cs_downsample: KernelKey,
    cs_horizontal: KernelKey,
    cs_vertical: KernelKey,
    scratch: Option<SurfaceKey>,
    result: Option<SurfaceKey>,
    scratch_size: UVec2,
}

impl LuminanceReducer {
    #[must_use]
    pub fn new(device: &mut Device) -> Self {
        Self {
            cs_downsample: device.compile_kernel(TONEMAP_MODULE, "cs_downsample_and_avg_lum", &[]),
            cs_horizontal: device.compile_kernel(TONEMAP_MODULE, "cs_avg_lum_horizontal", &[]),
            cs_vertical: device.compile_kernel(TONEMAP_MODULE, "cs_avg_lum_vertical", &[]),
            scratch: None,
            result: None,
            scratch_size: UVec2::ZERO,
        }
    }

    /// Match the scratch and result surfaces to the half-res grid.
    pub fn sync_resources(&mut self, device: &mut Device, half_size: UVec2) {
        self.scratch_size = UVec2::new(
            half_size.x.div_ceil(POSTFX_GROUP_SIZE),
            half_size.y.div_ceil(POSTFX_GROUP_SIZE),
        );
        let flags = BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS;
        self.scratch = Some(device.surfaces_mut().create_or_resize_2d(
            self.scratch,
            SurfaceDesc::new(SurfaceFormat::R32Float, self.scratch_size.x, self.scratch_size.y, flags),
        ));
        self.result = Some(device.surfaces_mut().create_or_resize_2d(
            self.result,
            SurfaceDesc::new(SurfaceFormat::R32Float, 1, 1, flags),
        ));
    }

    /// Stage A: downsample `src` into `half_res` while accumulating per-tile
    /// log-luminance sums into the scratch surface.
    ///
    /// Requires a prior [`sync_resources`](Self::sync_resources); without it
    /// nothing is dispatched and `UNSPECIFIED_ERROR` is returned.
    pub fn dispatch_downsample(
        &mut self,
        device: &mut Device,
        constants: ConstantsKey,
        src: SurfaceKey,
        half_res: SurfaceKey,
        half_size: UVec2,
    ) -> DrawResultFlags {
        let Some(scratch) = self.scratch else {
            log::warn!("luminance downsample dispatched before resource sync");
            return DrawResultFlags::UNSPECIFIED_ERROR;
        };
        let mut bindings = Bindings::new();
        bindings.constants = Some(constants);
        bindings.srvs[0] = Some(src);
        bindings.uavs[0] = Some(half_res);
        bindings.uavs[1] = Some(scratch);
        let groups = UVec2::new(
            half_size.x.div_ceil(POSTFX_GROUP_SIZE),
            half_size.y.div_ceil(POSTFX_GROUP_SIZE),
        );
        device.dispatch_compute(self.cs_downsample, groups, &bindings)
    }

    /// Stage B: collapse the scratch surface into the 1×1 result.
    pub fn reduce(&mut self, device: &mut Device, constants: ConstantsKey) -> DrawResultFlags {
        let (Some(scratch), Some(result)) = (self.scratch, self.result) else {
            log::warn!("luminance reduction dispatched before resource sync");
            return DrawResultFlags::UNSPECIFIED_ERROR;
        };
        let mut bindings = Bindings::new();
        bindings.constants = Some(constants);
        bindings.uavs[0] = Some(scratch);
        let row_groups = UVec2::new(self.scratch_size.y.div_ceil(REDUCE_ROW_LANES), 1);
        let mut flags = device.dispatch_compute(self.cs_horizontal, row_groups, &bindings);

        let mut bindings = Bindings::new();
        bindings.constants = Some(constants);
        bindings.srvs[0] = Some(scratch);
        bindings.uavs[0] = Some(result);
        flags |= device.dispatch_compute(self.cs_vertical, UVec2::ONE, &bindings);
        flags
    }

    /// The 1×1 surface holding the last reduced average log-luminance.
    #[must_use]
    pub fn result(&self) -> Option<SurfaceKey> {
        self.result
    }
}
