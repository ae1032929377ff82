//! Tonemap Compositor Tests
//!
//! Tests for:
//! - Multisampled source rejection with zero side effects
//! - Classic and modified Reinhard curve values
//! - Pass-through when post-processing is disabled
//! - Luma export, bloom spread, tonemapper skip, auto-exposure adaptation

use glam::Vec4;

use ember_post::create_device;
use ember_post::gpu::{BindFlags, Device, DrawResultFlags, SurfaceDesc, SurfaceFormat, SurfaceKey};
use ember_post::{AdditionalParams, PostProcessTonemap, RenderCamera};

fn color_desc(width: u32, height: u32) -> SurfaceDesc {
    SurfaceDesc::new(
        SurfaceFormat::Rgba32Float,
        width,
        height,
        BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS | BindFlags::RENDER_TARGET,
    )
}

fn new_filled(device: &mut Device, width: u32, height: u32, value: Vec4) -> SurfaceKey {
    let key = device.surfaces_mut().create_2d(color_desc(width, height));
    device.surfaces_mut().get_mut(key).unwrap().fill(value);
    key
}

/// Exposure pinned at 0 EV, auto features and bloom off, saturation 1.
fn neutral_camera() -> RenderCamera {
    let mut camera = RenderCamera::new();
    camera.settings.exposure.exposure = 0.0;
    camera.settings.exposure.use_auto_exposure = false;
    camera.settings.tonemap.use_modified_reinhard = false;
    camera.settings.tonemap.saturation = 1.0;
    camera.settings.bloom.use_bloom = false;
    camera
}

fn run(
    device: &mut Device,
    tonemap: &mut PostProcessTonemap,
    camera: &mut RenderCamera,
    dst: SurfaceKey,
    src: SurfaceKey,
    additional: &AdditionalParams,
) -> DrawResultFlags {
    tonemap.tick_and_apply_camera_post_process(device, camera, 1.0 / 60.0, dst, src, additional)
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn multisampled_source_is_rejected_without_side_effects() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();

    let src = device
        .surfaces_mut()
        .create_2d(color_desc(64, 64).with_sample_count(4));
    let dst = new_filled(&mut device, 64, 64, Vec4::splat(9.0));
    let allocs = device.surfaces().allocation_count();

    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::UNSUPPORTED_INPUT);
    // No reallocation, no dispatch, no camera push.
    assert_eq!(device.surfaces().allocation_count(), allocs);
    assert!(tonemap.half_res().is_none());
    assert!(!camera.has_luminance());
    let out = device.surfaces().get(dst).unwrap();
    assert!((out.texel(1, 1).x - 9.0).abs() < f32::EPSILON);
}

#[test]
fn stale_source_reports_unspecified_error() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();

    let src = new_filled(&mut device, 64, 64, Vec4::ONE);
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));
    device.surfaces_mut().destroy(src);

    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::UNSPECIFIED_ERROR);
}

// ============================================================================
// Curve values
// ============================================================================

#[test]
fn classic_reinhard_halves_unit_luminance() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();

    let src = new_filled(&mut device, 64, 64, Vec4::ONE);
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));

    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::NONE);

    // L / (1 + L) with L = 1.
    let out = device.surfaces().get(dst).unwrap().texel(32, 32);
    assert!((out.x - 0.5).abs() < 1e-4, "got {}", out.x);
    assert!((out.y - 0.5).abs() < 1e-4);
    assert!((out.z - 0.5).abs() < 1e-4);
    assert!((out.w - 1.0).abs() < 1e-6);
}

#[test]
fn modified_reinhard_reaches_white_at_the_white_level() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();
    camera.settings.tonemap.use_modified_reinhard = true;
    camera.settings.tonemap.modified_reinhard_white_level = 4.0;

    let src = new_filled(&mut device, 64, 64, Vec4::new(4.0, 4.0, 4.0, 1.0));
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));

    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::NONE);

    let out = device.surfaces().get(dst).unwrap().texel(10, 10);
    assert!((out.x - 1.0).abs() < 1e-4, "got {}", out.x);
}

#[test]
fn output_is_clamped_to_displayable_range() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();
    camera.settings.tonemap.use_modified_reinhard = true;
    camera.settings.tonemap.modified_reinhard_white_level = 2.0;

    // Far above the white level.
    let src = new_filled(&mut device, 64, 64, Vec4::new(30.0, 30.0, 30.0, 1.0));
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));
    run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());

    let out = device.surfaces().get(dst).unwrap().texel(32, 32);
    assert!((out.x - 1.0).abs() < f32::EPSILON);
}

#[test]
fn disabled_post_process_copies_the_source() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();
    camera.settings.general.enable_post_process = false;

    let src = device.surfaces_mut().create_2d(color_desc(32, 32));
    {
        let surface = device.surfaces_mut().get_mut(src).unwrap();
        for y in 0..32 {
            for x in 0..32 {
                surface.set_texel(x, y, Vec4::new(x as f32, y as f32, 1.7, 1.0));
            }
        }
    }
    let dst = device.surfaces_mut().create_2d(color_desc(32, 32));

    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::NONE);

    let src_surface = device.surfaces().get(src).unwrap();
    let dst_surface = device.surfaces().get(dst).unwrap();
    for y in 0..32 {
        for x in 0..32 {
            assert_eq!(src_surface.texel(x, y), dst_surface.texel(x, y));
        }
    }
}

// ============================================================================
// Additional params
// ============================================================================

#[test]
fn skip_tonemapper_copies_the_source_unchanged() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();

    let src = new_filled(&mut device, 64, 64, Vec4::new(1.7, 1.7, 1.7, 1.0));
    let dst = new_filled(&mut device, 64, 64, Vec4::splat(123.0));

    let additional = AdditionalParams {
        skip_tonemapper: true,
        ..AdditionalParams::default()
    };
    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &additional);
    assert_eq!(flags, DrawResultFlags::NONE);
    // Luminance still ran.
    assert!(camera.has_luminance());
    // The curve is bypassed but the source is still copied through; 1.7
    // would have been curved well below itself otherwise.
    let out = device.surfaces().get(dst).unwrap();
    assert_eq!(out.texel(0, 0), Vec4::new(1.7, 1.7, 1.7, 1.0));
    assert_eq!(out.texel(32, 32), Vec4::new(1.7, 1.7, 1.7, 1.0));
}

#[test]
fn luma_export_receives_log_luminance() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();

    let src = new_filled(&mut device, 64, 64, Vec4::new(2.0, 2.0, 2.0, 1.0));
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));
    let export = device.surfaces_mut().create_2d(SurfaceDesc::new(
        SurfaceFormat::R32Float,
        64,
        64,
        BindFlags::UNORDERED_ACCESS,
    ));

    let additional = AdditionalParams {
        out_export_luma: Some(export),
        ..AdditionalParams::default()
    };
    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &additional);
    assert_eq!(flags, DrawResultFlags::NONE);

    let exported = device.surfaces().get(export).unwrap().texel(20, 20).x;
    assert!((exported - 2.0_f32.ln()).abs() < 1e-4, "got {exported}");
    // The curve output is unchanged by the export.
    let out = device.surfaces().get(dst).unwrap().texel(20, 20);
    assert!((out.x - 2.0 / 3.0).abs() < 1e-4);
}

// ============================================================================
// Bloom
// ============================================================================

#[test]
fn bloom_spreads_bright_regions() {
    let bright = Vec4::new(10.0, 10.0, 10.0, 1.0);
    let probe = (38, 32);

    let run_once = |use_bloom: bool| -> f32 {
        let mut device = create_device();
        let mut tonemap = PostProcessTonemap::new(&mut device);
        let mut camera = neutral_camera();
        camera.settings.bloom.use_bloom = use_bloom;
        camera.settings.bloom.bloom_size = 2.0;
        camera.settings.bloom.bloom_multiplier = 0.1;
        camera.settings.bloom.bloom_min_threshold = 0.0;

        let src = new_filled(&mut device, 64, 64, Vec4::ZERO);
        {
            let surface = device.surfaces_mut().get_mut(src).unwrap();
            for y in 28..36 {
                for x in 28..36 {
                    surface.set_texel(x, y, bright);
                }
            }
        }
        let dst = device.surfaces_mut().create_2d(color_desc(64, 64));
        let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
        assert_eq!(flags, DrawResultFlags::NONE);
        device.surfaces().get(dst).unwrap().texel(probe.0, probe.1).x
    };

    let without = run_once(false);
    let with = run_once(true);
    assert!(with > without + 1e-4, "bloom {with} vs plain {without}");
}

#[test]
fn bloom_max_clamp_limits_the_transfer() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();
    camera.settings.bloom.use_bloom = true;
    camera.settings.bloom.bloom_size = 2.0;
    camera.settings.bloom.bloom_multiplier = 1.0;
    camera.settings.bloom.bloom_min_threshold = 0.0;
    camera.settings.bloom.bloom_max_clamp = 0.25;

    let src = new_filled(&mut device, 64, 64, Vec4::new(100.0, 100.0, 100.0, 1.0));
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));
    let flags = run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert_eq!(flags, DrawResultFlags::NONE);

    // Composite added at most the clamp to the uniform source.
    let composited = device.surfaces().get(src).unwrap().texel(32, 32).x;
    assert!(composited <= 100.25 + 1e-3, "got {composited}");
    assert!(composited > 100.0);
}

// ============================================================================
// Auto exposure
// ============================================================================

#[test]
fn auto_exposure_adapts_to_the_scene() {
    let mut device = create_device();
    let mut tonemap = PostProcessTonemap::new(&mut device);
    let mut camera = neutral_camera();
    camera.settings.exposure.use_auto_exposure = true;
    camera.settings.exposure.auto_exposure_adaptation_speed = f32::INFINITY;

    let src = new_filled(&mut device, 64, 64, Vec4::new(8.0, 8.0, 8.0, 1.0));
    let dst = device.surfaces_mut().create_2d(color_desc(64, 64));

    // First frame measures, second frame adapts (the tick precedes the
    // luminance push within a frame).
    run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    assert!(camera.has_luminance());
    assert!((camera.settings.exposure.exposure - 0.0).abs() < f32::EPSILON);

    run(&mut device, &mut tonemap, &mut camera, dst, src, &AdditionalParams::default());
    // A bright scene drives exposure down.
    assert!(camera.settings.exposure.exposure < -1.0, "exposure {}", camera.settings.exposure.exposure);
}
