//! Execution Device Tests
//!
//! Tests for:
//! - SurfacePool: idempotent create-or-resize, generation-counted keys
//! - Bilinear sampling conventions (texel centers, clamp-to-edge)
//! - Kernel compilation: background resolve, unknown entry points
//! - Dispatch: blend modes, binding aliasing, stale handles

use glam::{UVec2, Vec4};

use ember_post::create_device;
use ember_post::gpu::{
    BindFlags, Bindings, BlendMode, Device, DrawResultFlags, SurfaceDesc, SurfaceFormat,
};
use ember_post::post::shaders::TONEMAP_MODULE;

fn test_device() -> Device {
    let _ = env_logger::builder().is_test(true).try_init();
    create_device()
}

fn color_desc(width: u32, height: u32) -> SurfaceDesc {
    SurfaceDesc::new(
        SurfaceFormat::Rgba32Float,
        width,
        height,
        BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS | BindFlags::RENDER_TARGET,
    )
}

// ============================================================================
// Surface pool
// ============================================================================

#[test]
fn create_or_resize_is_idempotent_for_matching_descriptors() {
    let mut device = test_device();
    let desc = color_desc(64, 64);

    let first = device.surfaces_mut().create_or_resize_2d(None, desc);
    let allocs = device.surfaces().allocation_count();

    let second = device.surfaces_mut().create_or_resize_2d(Some(first), desc);
    assert_eq!(first, second);
    assert_eq!(device.surfaces().allocation_count(), allocs);
}

#[test]
fn create_or_resize_invalidates_the_old_key_on_change() {
    let mut device = test_device();
    let old = device.surfaces_mut().create_or_resize_2d(None, color_desc(64, 64));
    device.surfaces_mut().get_mut(old).unwrap().fill(Vec4::ONE);

    let new = device
        .surfaces_mut()
        .create_or_resize_2d(Some(old), color_desc(128, 128));
    assert_ne!(old, new);
    assert!(device.surfaces().get(old).is_none());
    // Fresh allocations are zeroed.
    assert_eq!(device.surfaces().get(new).unwrap().texel(0, 0), Vec4::ZERO);
}

#[test]
fn destroyed_keys_do_not_resolve() {
    let mut device = test_device();
    let key = device.surfaces_mut().create_2d(color_desc(8, 8));
    device.surfaces_mut().destroy(key);
    assert!(device.surfaces().get(key).is_none());
}

// ============================================================================
// Sampling
// ============================================================================

#[test]
fn bilinear_sample_at_texel_centers_is_exact() {
    let mut device = test_device();
    let key = device.surfaces_mut().create_2d(color_desc(2, 2));
    let surface = device.surfaces_mut().get_mut(key).unwrap();
    surface.set_texel(0, 0, Vec4::splat(1.0));
    surface.set_texel(1, 0, Vec4::splat(3.0));

    assert!((surface.sample_bilinear(0.25, 0.25).x - 1.0).abs() < 1e-6);
    assert!((surface.sample_bilinear(0.75, 0.25).x - 3.0).abs() < 1e-6);
    // Halfway between the two centers.
    assert!((surface.sample_bilinear(0.5, 0.25).x - 2.0).abs() < 1e-6);
}

#[test]
fn bilinear_sample_clamps_to_edge() {
    let mut device = test_device();
    let key = device.surfaces_mut().create_2d(color_desc(2, 2));
    let surface = device.surfaces_mut().get_mut(key).unwrap();
    surface.fill(Vec4::splat(5.0));

    assert!((surface.sample_bilinear(-0.5, 0.5).x - 5.0).abs() < 1e-6);
    assert!((surface.sample_bilinear(1.5, 1.5).x - 5.0).abs() < 1e-6);
}

// ============================================================================
// Kernel compilation and dispatch
// ============================================================================

#[test]
fn unknown_entry_point_fails_at_dispatch() {
    let mut device = test_device();
    let kernel = device.compile_kernel(TONEMAP_MODULE, "cs_does_not_exist", &[]);
    let flags = device.dispatch_compute(kernel, UVec2::ONE, &Bindings::new());
    assert_eq!(flags, DrawResultFlags::UNSPECIFIED_ERROR);
}

#[test]
fn pass_through_respects_blend_modes() {
    let mut device = test_device();
    let kernel = device.compile_kernel(TONEMAP_MODULE, "ps_pass_through", &[]);
    let src = device.surfaces_mut().create_2d(color_desc(4, 4));
    device.surfaces_mut().get_mut(src).unwrap().fill(Vec4::splat(3.0));
    let dst = device.surfaces_mut().create_2d(color_desc(4, 4));

    let mut bindings = Bindings::new();
    bindings.srvs[0] = Some(src);

    let flags = device.dispatch_fullscreen(kernel, &bindings, BlendMode::Opaque, dst);
    assert_eq!(flags, DrawResultFlags::NONE);
    assert_eq!(device.surfaces().get(dst).unwrap().texel(2, 2), Vec4::splat(3.0));

    let flags = device.dispatch_fullscreen(kernel, &bindings, BlendMode::Additive, dst);
    assert_eq!(flags, DrawResultFlags::NONE);
    assert_eq!(device.surfaces().get(dst).unwrap().texel(2, 2), Vec4::splat(6.0));
}

#[test]
fn aliased_bindings_are_rejected() {
    let mut device = test_device();
    let kernel = device.compile_kernel(TONEMAP_MODULE, "ps_pass_through", &[]);
    let surface = device.surfaces_mut().create_2d(color_desc(4, 4));

    let mut bindings = Bindings::new();
    bindings.srvs[0] = Some(surface);

    let flags = device.dispatch_fullscreen(kernel, &bindings, BlendMode::Opaque, surface);
    assert_eq!(flags, DrawResultFlags::UNSPECIFIED_ERROR);
}

#[test]
fn stale_binding_reports_unspecified_error() {
    let mut device = test_device();
    let kernel = device.compile_kernel(TONEMAP_MODULE, "ps_pass_through", &[]);
    let src = device.surfaces_mut().create_2d(color_desc(4, 4));
    let dst = device.surfaces_mut().create_2d(color_desc(4, 4));
    device.surfaces_mut().destroy(src);

    let mut bindings = Bindings::new();
    bindings.srvs[0] = Some(src);
    let flags = device.dispatch_fullscreen(kernel, &bindings, BlendMode::Opaque, dst);
    assert_eq!(flags, DrawResultFlags::UNSPECIFIED_ERROR);
}

#[test]
fn compile_waits_only_when_dispatched() {
    let mut device = test_device();
    // Queue several compiles; none should block creation.
    let kernels: Vec<_> = (0..4)
        .map(|_| device.compile_kernel(TONEMAP_MODULE, "ps_pass_through", &[]))
        .collect();

    let src = device.surfaces_mut().create_2d(color_desc(4, 4));
    let dst = device.surfaces_mut().create_2d(color_desc(4, 4));
    let mut bindings = Bindings::new();
    bindings.srvs[0] = Some(src);

    for kernel in kernels {
        assert_eq!(
            device.dispatch_fullscreen(kernel, &bindings, BlendMode::Opaque, dst),
            DrawResultFlags::NONE
        );
    }
}
