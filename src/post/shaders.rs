//! Post-processing kernel library
//!
//! The software counterparts of the effect shaders, plus the constant-block
//! layouts shared between the effects (upload side) and the routines (read
//! side). Binding layouts are fixed per kernel and documented on each
//! routine.

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec3, Vec4};

use crate::gpu::{KernelIo, ShaderLibrary};

/// Blur shader module name.
pub const BLUR_MODULE: &str = "postfx_blur";
/// Tonemap shader module name.
pub const TONEMAP_MODULE: &str = "postfx_tonemap";

/// Tap-table capacity; covers the maximum blur radius of 2048
/// (one-sided half of 2049 entries folds into 1025 bilinear taps).
pub const MAX_BLUR_TAPS: usize = 1025;

/// Thread-group edge used by the blur and downsample kernels.
pub const POSTFX_GROUP_SIZE: u32 = 8;

/// Perceptual luminance weights (Rec. 601, sum to 1).
const LUMA_WEIGHTS: Vec3 = Vec3::new(0.299, 0.587, 0.114);

/// Constant block for the separable blur kernels.
///
/// `taps[i]` packs one bilinear tap: `.x` offset in texels along the blur
/// axis, `.y` weight; `.zw` unused. Only the first `tap_count` entries are
/// meaningful.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BlurConstants {
    /// `1 / dimensions` of the surface being blurred.
    pub pixel_size: [f32; 2],
    /// Free multiplier applied to the blurred result (1 when unused).
    pub factor0: f32,
    pub tap_count: u32,
    pub taps: [[f32; 4]; MAX_BLUR_TAPS],
}

/// Constant block for the tonemap/bloom/luminance kernels.
///
/// Values suffixed `_pe` are in pre-exposed space (already multiplied by
/// `pre_exposure_multiplier`), matching the radiance they are compared to.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct TonemapConstants {
    /// `1 / dimensions` of the destination viewport.
    pub viewport_pixel_size: [f32; 2],
    /// Maps full-res pixel coords into normalized UVs of the half-res
    /// bloom surface.
    pub bloom_sample_uv_mul: [f32; 2],
    pub exposure: f32,
    pub pre_exposure_multiplier: f32,
    pub white_level: f32,
    pub white_level_squared: f32,
    pub saturation: f32,
    pub bloom_multiplier: f32,
    pub bloom_min_threshold_pe: f32,
    pub bloom_max_clamp_pe: f32,
    /// Texel count of the half-res surface; divides the reduced log-lum sum.
    pub half_res_pixel_count: f32,
    pub hdr_clamp_pe: f32,
    pub padding: [f32; 2],
}

/// Register every post-processing kernel.
#[must_use]
pub fn library() -> ShaderLibrary {
    let group = UVec2::splat(POSTFX_GROUP_SIZE);
    let mut lib = ShaderLibrary::new();
    lib.register_compute(BLUR_MODULE, "cs_gauss_horizontal", group, cs_gauss_horizontal);
    lib.register_compute(BLUR_MODULE, "cs_gauss_vertical", group, cs_gauss_vertical);
    lib.register_compute(TONEMAP_MODULE, "cs_downsample_and_avg_lum", group, cs_downsample_and_avg_lum);
    lib.register_compute(TONEMAP_MODULE, "cs_avg_lum_horizontal", UVec2::new(64, 1), cs_avg_lum_horizontal);
    lib.register_compute(TONEMAP_MODULE, "cs_avg_lum_vertical", UVec2::ONE, cs_avg_lum_vertical);
    lib.register_pixel(TONEMAP_MODULE, "ps_add_bloom", ps_add_bloom);
    lib.register_pixel(TONEMAP_MODULE, "ps_tonemap", ps_tonemap);
    lib.register_pixel(TONEMAP_MODULE, "ps_tonemap_luma_export", ps_tonemap_luma_export);
    lib.register_pixel(TONEMAP_MODULE, "ps_pass_through", ps_pass_through);
    lib
}

// ── Separable blur ──────────────────────────────────────────────────────────

/// Shared body of the two blur axes. The tap table is one-sided with the
/// weights summing to 1, so the mirrored samples are averaged.
fn gauss_blur_axis(id: UVec2, io: &mut KernelIo, axis: Vec4) {
    let size = io.uav_size(0);
    if id.x >= size.x || id.y >= size.y {
        return;
    }
    let consts: &BlurConstants = io.constants_ref();
    let src = io.srv(0);

    let center = Vec4::new(
        (id.x as f32 + 0.5) * consts.pixel_size[0],
        (id.y as f32 + 0.5) * consts.pixel_size[1],
        0.0,
        0.0,
    );
    let step = axis * Vec4::new(consts.pixel_size[0], consts.pixel_size[1], 0.0, 0.0);

    let mut acc = Vec4::ZERO;
    for tap in &consts.taps[..consts.tap_count as usize] {
        let offset = step * tap[0];
        let forward = center + offset;
        let backward = center - offset;
        let pair = src.sample_bilinear(forward.x, forward.y)
            + src.sample_bilinear(backward.x, backward.y);
        acc += pair * (tap[1] * 0.5);
    }
    io.uav_write(0, id.x, id.y, acc * consts.factor0);
}

/// `postfx_blur::cs_gauss_horizontal` — SRV0 source, UAV0 destination.
fn cs_gauss_horizontal(id: UVec2, io: &mut KernelIo) {
    gauss_blur_axis(id, io, Vec4::new(1.0, 0.0, 0.0, 0.0));
}

/// `postfx_blur::cs_gauss_vertical` — SRV0 source, UAV0 destination.
fn cs_gauss_vertical(id: UVec2, io: &mut KernelIo) {
    gauss_blur_axis(id, io, Vec4::new(0.0, 1.0, 0.0, 0.0));
}

// ── Downsample + luminance reduction ────────────────────────────────────────

/// 2×2 box filter of the full-res source at a half-res coordinate,
/// clamped at the edges for odd source dimensions.
fn downsample_2x2(src: &crate::gpu::Surface, half_pos: UVec2) -> Vec4 {
    let x0 = half_pos.x * 2;
    let y0 = half_pos.y * 2;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    (src.texel(x0, y0) + src.texel(x1, y0) + src.texel(x0, y1) + src.texel(x1, y1)) * 0.25
}

/// Log-luminance of one pre-exposed radiance value, in scene (un-exposed)
/// space.
fn log_luminance(color: Vec4, consts: &TonemapConstants) -> f32 {
    let lum = color.truncate().dot(LUMA_WEIGHTS).max(0.000_001);
    (lum / consts.pre_exposure_multiplier).ln()
}

/// `postfx_tonemap::cs_downsample_and_avg_lum` — SRV0 full-res radiance,
/// UAV0 half-res color, UAV1 log-luminance tile scratch.
///
/// Every in-bounds invocation writes one half-res texel; the (0,0) lane of
/// each 8×8 tile additionally recomputes the tile's log-luminance sum from
/// the source and writes the scratch texel, keeping the scratch write
/// single-owner and deterministic.
fn cs_downsample_and_avg_lum(id: UVec2, io: &mut KernelIo) {
    let half = io.uav_size(0);
    let consts = io.constants::<TonemapConstants>();
    let src = io.srv(0);

    if id.x < half.x && id.y < half.y {
        io.uav_write(0, id.x, id.y, downsample_2x2(src, id));
    }

    if id.x % POSTFX_GROUP_SIZE != 0 || id.y % POSTFX_GROUP_SIZE != 0 {
        return;
    }
    let scratch = io.uav_size(1);
    let tile = id / POSTFX_GROUP_SIZE;
    if tile.x >= scratch.x || tile.y >= scratch.y {
        return;
    }

    let mut sum = 0.0_f32;
    for y in tile.y * POSTFX_GROUP_SIZE..((tile.y + 1) * POSTFX_GROUP_SIZE).min(half.y) {
        for x in tile.x * POSTFX_GROUP_SIZE..((tile.x + 1) * POSTFX_GROUP_SIZE).min(half.x) {
            sum += log_luminance(downsample_2x2(src, UVec2::new(x, y)), &consts);
        }
    }
    io.uav_write(1, tile.x, tile.y, Vec4::new(sum, 0.0, 0.0, 0.0));
}

/// `postfx_tonemap::cs_avg_lum_horizontal` — UAV0 scratch; one lane per
/// scratch row, collapsing the row's tile sums into column 0.
fn cs_avg_lum_horizontal(id: UVec2, io: &mut KernelIo) {
    let size = io.uav_size(0);
    if id.y != 0 || id.x >= size.y {
        return;
    }
    let row = id.x;
    let mut sum = 0.0_f32;
    for x in 0..size.x {
        sum += io.uav_read(0, x, row).x;
    }
    io.uav_write(0, 0, row, Vec4::new(sum, 0.0, 0.0, 0.0));
}

/// `postfx_tonemap::cs_avg_lum_vertical` — SRV0 scratch, UAV0 1×1 result;
/// a single lane sums column 0 and divides by the half-res texel count,
/// producing the scene average log-luminance.
fn cs_avg_lum_vertical(id: UVec2, io: &mut KernelIo) {
    if id != UVec2::ZERO {
        return;
    }
    let consts = io.constants::<TonemapConstants>();
    let scratch = io.srv(0);
    let mut sum = 0.0_f32;
    for y in 0..scratch.height() {
        sum += scratch.texel(0, y).x;
    }
    let avg = sum / consts.half_res_pixel_count.max(1.0);
    io.uav_write(0, 0, 0, Vec4::new(avg, 0.0, 0.0, 0.0));
}

// ── Composite and final curve ───────────────────────────────────────────────

/// `postfx_tonemap::ps_add_bloom` — SRV0 blurred half-res bloom, additive
/// onto the full-res radiance target. Threshold and clamp are per channel
/// and in pre-exposed space.
fn ps_add_bloom(pos: UVec2, io: &mut KernelIo) -> Vec4 {
    let consts = io.constants::<TonemapConstants>();
    let bloom = io.srv(0);
    let u = (pos.x as f32 + 0.5) * consts.bloom_sample_uv_mul[0];
    let v = (pos.y as f32 + 0.5) * consts.bloom_sample_uv_mul[1];
    let color = bloom.sample_bilinear(u, v).truncate();
    let color = (color - Vec3::splat(consts.bloom_min_threshold_pe))
        .max(Vec3::ZERO)
        .min(Vec3::splat(consts.bloom_max_clamp_pe))
        * consts.bloom_multiplier;
    color.extend(0.0)
}

/// Modified-Reinhard curve on a pre-exposed radiance value; returns the
/// display color and the pre-curve luminance.
///
/// `white_level_squared` of infinity degenerates `L * (1 + L/W²) / (1 + L)`
/// to the classic `L / (1 + L)`; at `L == W` the output luminance is
/// exactly 1.
fn tonemap_color(color: Vec4, consts: &TonemapConstants) -> (Vec4, f32) {
    let rgb = color.truncate().min(Vec3::splat(consts.hdr_clamp_pe));
    let lum = rgb.dot(LUMA_WEIGHTS).max(0.000_001);
    let curved = lum * (1.0 + lum / consts.white_level_squared) / (1.0 + lum);
    let rgb = rgb * (curved / lum);
    let gray = Vec3::splat(rgb.dot(LUMA_WEIGHTS));
    let rgb = gray.lerp(rgb, consts.saturation).clamp(Vec3::ZERO, Vec3::ONE);
    (rgb.extend(1.0), lum)
}

/// `postfx_tonemap::ps_tonemap` — SRV0 radiance, opaque onto the target.
fn ps_tonemap(pos: UVec2, io: &mut KernelIo) -> Vec4 {
    let consts = io.constants::<TonemapConstants>();
    let src = io.srv(0);
    tonemap_color(src.texel(pos.x, pos.y), &consts).0
}

/// `postfx_tonemap::ps_tonemap_luma_export` — as [`ps_tonemap`], but also
/// writes `ln(L)` of the pre-curve luminance to UAV0.
fn ps_tonemap_luma_export(pos: UVec2, io: &mut KernelIo) -> Vec4 {
    let consts = io.constants::<TonemapConstants>();
    let src = io.srv(0);
    let (color, lum) = tonemap_color(src.texel(pos.x, pos.y), &consts);
    io.uav_write(0, pos.x, pos.y, Vec4::new(lum.ln(), 0.0, 0.0, 0.0));
    color
}

/// `postfx_tonemap::ps_pass_through` — SRV0 copied to the target untouched.
fn ps_pass_through(pos: UVec2, io: &mut KernelIo) -> Vec4 {
    io.srv(0).texel(pos.x, pos.y)
}
