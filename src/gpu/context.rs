//! Execution device
//!
//! [`Device`] is the narrow execution substrate the post-processing core is
//! written against: ordered compute and fullscreen dispatches over pooled
//! surfaces, slot-indexed bindings, constant-buffer uploads, and a flags
//! value accumulating per-pass failures. This crate ships it as a
//! deterministic software implementation; every routine runs invocation by
//! invocation on the submission thread, with UAV writes staged per pass and
//! committed when the pass ends.

use bitflags::bitflags;
use bytemuck::Pod;
use glam::{UVec2, Vec4};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::errors::{PostFxError, Result};

use super::shader::{KernelKey, KernelRoutine, ShaderCache, ShaderLibrary};
use super::surface::{Surface, SurfaceDesc, SurfaceKey, SurfacePool};

bitflags! {
    /// Accumulated outcome of one or more dispatches.
    ///
    /// Empty means success. Flags are ORed as a frame's passes execute and
    /// returned to the caller instead of unwinding; a non-empty value means
    /// "this frame's post-process is degraded, continue to the next frame".
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DrawResultFlags: u32 {
        /// Rejected input parameter (bad sigma/radius/ratio).
        const INVALID_PARAMETER = 1 << 0;
        /// The source image cannot be consumed (e.g. multisampled).
        const UNSUPPORTED_INPUT = 1 << 1;
        /// Propagated execution failure (lost resource, failed compile).
        const UNSPECIFIED_ERROR = 1 << 2;
    }
}

impl DrawResultFlags {
    /// Success value; named for call-site readability.
    pub const NONE: Self = Self::empty();
}

/// Output blend applied by fullscreen passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// Replace the render-target texel.
    Opaque,
    /// Add onto the render-target texel (bloom composite).
    Additive,
}

new_key_type! {
    /// Handle to a constant buffer owned by the device.
    pub struct ConstantsKey;
}

/// Word-aligned constant storage, so Pod views are properly aligned.
struct ConstantBuffer {
    label: String,
    words: Vec<u32>,
}

/// Number of SRV/UAV slots per dispatch, enough for every pass in the core.
pub const MAX_BINDING_SLOTS: usize = 4;

/// Slot-indexed resource bindings for one dispatch.
#[derive(Clone, Default)]
pub struct Bindings {
    pub constants: Option<ConstantsKey>,
    pub srvs: [Option<SurfaceKey>; MAX_BINDING_SLOTS],
    pub uavs: [Option<SurfaceKey>; MAX_BINDING_SLOTS],
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// One staged UAV: data is taken out of the pool for the duration of the
/// pass and committed back afterwards.
struct UavStage {
    slot: usize,
    key: SurfaceKey,
    desc: SurfaceDesc,
    data: Vec<f32>,
}

/// Invocation-side view of a dispatch's bindings.
///
/// What a shader sees: read-only SRVs, read-write UAVs, and the bound
/// constant block.
pub struct KernelIo<'a> {
    constants: &'a [u8],
    srvs: [Option<&'a Surface>; MAX_BINDING_SLOTS],
    uavs: SmallVec<[UavStage; 2]>,
}

impl<'a> KernelIo<'a> {
    /// View the bound constant block as `T`.
    ///
    /// Reads zeroes when no block (or a smaller block) is bound, matching
    /// how GPU drivers surface unbound constant registers.
    #[must_use]
    pub fn constants<T: Pod>(&self) -> T {
        let size = size_of::<T>();
        if self.constants.len() >= size {
            *bytemuck::from_bytes(&self.constants[..size])
        } else {
            T::zeroed()
        }
    }

    /// Borrow the bound constant block as `T`. The returned reference is not
    /// tied to `&self`, so routines can keep it across UAV writes.
    ///
    /// # Panics
    /// Panics when the bound block is smaller than `T`; binding layouts are
    /// fixed per kernel.
    #[must_use]
    pub fn constants_ref<T: Pod>(&self) -> &'a T {
        bytemuck::from_bytes(&self.constants[..size_of::<T>()])
    }

    /// The surface bound at SRV `slot`. The returned reference is not tied
    /// to `&self`, so routines can keep it across UAV writes.
    ///
    /// # Panics
    /// Panics when the slot is unbound; binding layouts are fixed per kernel.
    #[must_use]
    pub fn srv(&self, slot: usize) -> &'a Surface {
        self.srvs[slot].expect("SRV slot not bound")
    }

    fn uav_stage(&self, slot: usize) -> &UavStage {
        self.uavs
            .iter()
            .find(|s| s.slot == slot)
            .expect("UAV slot not bound")
    }

    fn uav_stage_mut(&mut self, slot: usize) -> &mut UavStage {
        self.uavs
            .iter_mut()
            .find(|s| s.slot == slot)
            .expect("UAV slot not bound")
    }

    /// Dimensions of the surface bound at UAV `slot`.
    #[must_use]
    pub fn uav_size(&self, slot: usize) -> UVec2 {
        let desc = &self.uav_stage(slot).desc;
        UVec2::new(desc.width, desc.height)
    }

    /// Read a texel from UAV `slot`.
    #[must_use]
    pub fn uav_read(&self, slot: usize, x: u32, y: u32) -> Vec4 {
        let stage = self.uav_stage(slot);
        let ch = stage.desc.format.channels();
        let base = (y as usize * stage.desc.width as usize + x as usize) * ch;
        let mut out = Vec4::ZERO;
        for c in 0..ch {
            out[c] = stage.data[base + c];
        }
        out
    }

    /// Write a texel to UAV `slot`; channels beyond the format's are dropped.
    pub fn uav_write(&mut self, slot: usize, x: u32, y: u32, value: Vec4) {
        let stage = self.uav_stage_mut(slot);
        let ch = stage.desc.format.channels();
        let base = (y as usize * stage.desc.width as usize + x as usize) * ch;
        for c in 0..ch {
            stage.data[base + c] = value[c];
        }
    }
}

/// The software execution device: surface pool, shader cache, constant
/// buffers, and the two dispatch entry points.
///
/// A `Device` is owned by a single logical submission thread; passes issued
/// through it are strictly ordered. Sharing one instance across threads
/// requires external synchronization.
pub struct Device {
    surfaces: SurfacePool,
    constants: SlotMap<ConstantsKey, ConstantBuffer>,
    shaders: ShaderCache,
}

impl Device {
    /// Create a device around the given kernel library.
    #[must_use]
    pub fn new(library: ShaderLibrary) -> Self {
        Self {
            surfaces: SurfacePool::new(),
            constants: SlotMap::with_key(),
            shaders: ShaderCache::new(library),
        }
    }

    #[inline]
    #[must_use]
    pub fn surfaces(&self) -> &SurfacePool {
        &self.surfaces
    }

    #[inline]
    pub fn surfaces_mut(&mut self) -> &mut SurfacePool {
        &mut self.surfaces
    }

    /// Start a background compile of `module::entry`.
    pub fn compile_kernel(&mut self, module: &str, entry: &str, macros: &[(String, String)]) -> KernelKey {
        self.shaders.compile(module, entry, macros)
    }

    /// Allocate an empty constant buffer.
    pub fn create_constants(&mut self, label: &str) -> ConstantsKey {
        self.constants.insert(ConstantBuffer {
            label: label.to_owned(),
            words: Vec::new(),
        })
    }

    /// Upload a Pod block into a constant buffer, replacing its contents.
    pub fn upload_constants<T: Pod>(&mut self, key: ConstantsKey, data: &T) {
        let Some(buffer) = self.constants.get_mut(key) else {
            log::warn!("upload to a stale constants handle ignored");
            return;
        };
        let bytes = bytemuck::bytes_of(data);
        buffer.words.resize(bytes.len().div_ceil(4), 0);
        bytemuck::cast_slice_mut::<u32, u8>(&mut buffer.words)[..bytes.len()].copy_from_slice(bytes);
        log::trace!("constants '{}' uploaded ({} bytes)", buffer.label, bytes.len());
    }

    /// Run a compute kernel over `group_count` thread groups.
    ///
    /// Blocks on the kernel's background compile first (that kernel only).
    pub fn dispatch_compute(&mut self, kernel: KernelKey, group_count: UVec2, bindings: &Bindings) -> DrawResultFlags {
        match self.run_compute(kernel, group_count, bindings) {
            Ok(()) => DrawResultFlags::NONE,
            Err(err) => {
                log::warn!("compute dispatch failed: {err}");
                err.result_flags()
            }
        }
    }

    /// Run a fullscreen pixel kernel over every texel of `render_target`,
    /// blending the routine's output per `blend`.
    pub fn dispatch_fullscreen(
        &mut self,
        kernel: KernelKey,
        bindings: &Bindings,
        blend: BlendMode,
        render_target: SurfaceKey,
    ) -> DrawResultFlags {
        match self.run_fullscreen(kernel, bindings, blend, render_target) {
            Ok(()) => DrawResultFlags::NONE,
            Err(err) => {
                log::warn!("fullscreen dispatch failed: {err}");
                err.result_flags()
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn validate_no_aliasing(bindings: &Bindings, render_target: Option<SurfaceKey>) -> Result<()> {
        let uav_or_rt = |key: SurfaceKey| {
            render_target == Some(key) || bindings.uavs.iter().flatten().any(|&u| u == key)
        };
        for &srv in bindings.srvs.iter().flatten() {
            if uav_or_rt(srv) {
                return Err(PostFxError::BindingAliased);
            }
        }
        if let Some(rt) = render_target {
            if bindings.uavs.iter().flatten().any(|&u| u == rt) {
                return Err(PostFxError::BindingAliased);
            }
        }
        Ok(())
    }

    /// Resolve every bound handle up front, before any UAV data is staged,
    /// so a stale handle cannot leave another surface's data taken out.
    fn validate_bindings(&self, bindings: &Bindings) -> Result<()> {
        if let Some(key) = bindings.constants {
            if !self.constants.contains_key(key) {
                return Err(PostFxError::ConstantsLost);
            }
        }
        for &key in bindings.srvs.iter().chain(bindings.uavs.iter()).flatten() {
            if self.surfaces.get(key).is_none() {
                return Err(PostFxError::SurfaceLost);
            }
        }
        Ok(())
    }

    fn stage_uavs(&mut self, bindings: &Bindings) -> Result<SmallVec<[UavStage; 2]>> {
        let mut stages = SmallVec::new();
        for (slot, key) in bindings.uavs.iter().enumerate() {
            let Some(key) = *key else { continue };
            let surface = self.surfaces.get_mut(key).ok_or(PostFxError::SurfaceLost)?;
            stages.push(UavStage {
                slot,
                key,
                desc: *surface.desc(),
                data: surface.take_data(),
            });
        }
        Ok(stages)
    }

    fn commit_uavs(&mut self, stages: SmallVec<[UavStage; 2]>) {
        for stage in stages {
            if let Some(surface) = self.surfaces.get_mut(stage.key) {
                surface.restore_data(stage.data);
            }
        }
    }

    fn run_compute(&mut self, kernel: KernelKey, group_count: UVec2, bindings: &Bindings) -> Result<()> {
        let compiled = self.shaders.wait_ready(kernel)?;
        let KernelRoutine::Compute(routine) = compiled.routine else {
            return Err(PostFxError::KernelLost);
        };
        Self::validate_no_aliasing(bindings, None)?;
        self.validate_bindings(bindings)?;

        let uavs = self.stage_uavs(bindings)?;
        let total = group_count * compiled.group_size;
        {
            let mut io = KernelIo {
                constants: Self::constants_bytes_of(&self.constants, bindings.constants)?,
                srvs: Self::srv_refs_of(&self.surfaces, bindings)?,
                uavs,
            };
            for y in 0..total.y {
                for x in 0..total.x {
                    routine(UVec2::new(x, y), &mut io);
                }
            }
            let stages = io.uavs;
            self.commit_uavs(stages);
        }
        Ok(())
    }

    fn run_fullscreen(
        &mut self,
        kernel: KernelKey,
        bindings: &Bindings,
        blend: BlendMode,
        render_target: SurfaceKey,
    ) -> Result<()> {
        let compiled = self.shaders.wait_ready(kernel)?;
        let KernelRoutine::Pixel(routine) = compiled.routine else {
            return Err(PostFxError::KernelLost);
        };
        Self::validate_no_aliasing(bindings, Some(render_target))?;
        self.validate_bindings(bindings)?;

        // Stage the render target like a UAV so the pass sees a stable view.
        let rt_surface = self.surfaces.get_mut(render_target).ok_or(PostFxError::SurfaceLost)?;
        let rt_desc = *rt_surface.desc();
        let mut rt_data = rt_surface.take_data();

        let uavs = self.stage_uavs(bindings)?;
        let result = (|| -> Result<()> {
            let mut io = KernelIo {
                constants: Self::constants_bytes_of(&self.constants, bindings.constants)?,
                srvs: Self::srv_refs_of(&self.surfaces, bindings)?,
                uavs,
            };
            let ch = rt_desc.format.channels();
            for y in 0..rt_desc.height {
                for x in 0..rt_desc.width {
                    let color = routine(UVec2::new(x, y), &mut io);
                    let base = (y as usize * rt_desc.width as usize + x as usize) * ch;
                    for c in 0..ch {
                        match blend {
                            BlendMode::Opaque => rt_data[base + c] = color[c],
                            BlendMode::Additive => rt_data[base + c] += color[c],
                        }
                    }
                }
            }
            let stages = io.uavs;
            self.commit_uavs(stages);
            Ok(())
        })();

        if let Some(surface) = self.surfaces.get_mut(render_target) {
            surface.restore_data(rt_data);
        }
        result
    }

    fn constants_bytes_of(
        constants: &SlotMap<ConstantsKey, ConstantBuffer>,
        key: Option<ConstantsKey>,
    ) -> Result<&[u8]> {
        match key {
            None => Ok(&[]),
            Some(key) => {
                let buffer = constants.get(key).ok_or(PostFxError::ConstantsLost)?;
                Ok(bytemuck::cast_slice(&buffer.words))
            }
        }
    }

    fn srv_refs_of<'a>(
        surfaces: &'a SurfacePool,
        bindings: &Bindings,
    ) -> Result<[Option<&'a Surface>; MAX_BINDING_SLOTS]> {
        let mut srvs: [Option<&'a Surface>; MAX_BINDING_SLOTS] = [None; MAX_BINDING_SLOTS];
        for (slot, key) in bindings.srvs.iter().enumerate() {
            if let Some(key) = *key {
                srvs[slot] = Some(surfaces.get(key).ok_or(PostFxError::SurfaceLost)?);
            }
        }
        Ok(srvs)
    }
}
