//! Surfaces and the surface pool
//!
//! 2D float image resources referenced by generation-counted [`SurfaceKey`]s.
//! The pool's [`create_or_resize_2d`](SurfacePool::create_or_resize_2d) is
//! idempotent: when the requested descriptor matches the existing surface the
//! same key comes back untouched; any divergence invalidates the old key and
//! allocates a fresh one. Resource caching throughout the crate is built on
//! that single primitive.
//!
//! Storage is one `f32` per channel regardless of the nominal format
//! (`Rgba16Float` is handled at full precision by the software device).

use glam::Vec4;
use slotmap::{SlotMap, new_key_type};

use bitflags::bitflags;

/// Texel format of a 2D surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    /// Four-channel 32-bit float (HDR radiance).
    Rgba32Float,
    /// Four-channel 16-bit float (HDR radiance, half storage on real GPUs).
    Rgba16Float,
    /// Single-channel 32-bit float (luminance scratch / results).
    R32Float,
}

impl SurfaceFormat {
    /// Number of float channels per texel.
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Rgba32Float | Self::Rgba16Float => 4,
            Self::R32Float => 1,
        }
    }
}

bitflags! {
    /// How a surface may be bound by a pass.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        const SHADER_RESOURCE  = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET    = 1 << 2;
    }
}

/// Descriptor for requesting a 2D surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub format: SurfaceFormat,
    pub width: u32,
    pub height: u32,
    pub bind_flags: BindFlags,
    pub sample_count: u32,
}

impl SurfaceDesc {
    /// Single-sampled 2D descriptor.
    #[must_use]
    pub fn new(format: SurfaceFormat, width: u32, height: u32, bind_flags: BindFlags) -> Self {
        Self {
            format,
            width,
            height,
            bind_flags,
            sample_count: 1,
        }
    }

    /// Same descriptor with an explicit sample count (the post-processing
    /// core itself never creates multisampled surfaces; this exists so
    /// callers can hand one in and have it rejected).
    #[must_use]
    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }
}

new_key_type! {
    /// Generation-counted handle to a pooled surface.
    pub struct SurfaceKey;
}

/// A 2D float image owned by the [`SurfacePool`].
#[derive(Clone, Debug)]
pub struct Surface {
    desc: SurfaceDesc,
    data: Vec<f32>,
}

impl Surface {
    fn new(desc: SurfaceDesc) -> Self {
        let len = desc.width as usize * desc.height as usize * desc.format.channels();
        Self {
            desc,
            data: vec![0.0; len],
        }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> SurfaceFormat {
        self.desc.format
    }

    #[inline]
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        self.desc.sample_count
    }

    #[inline]
    fn texel_index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.desc.width && y < self.desc.height);
        (y as usize * self.desc.width as usize + x as usize) * self.desc.format.channels()
    }

    /// Read a texel; missing channels read as 0.
    #[must_use]
    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        let base = self.texel_index(x, y);
        let ch = self.desc.format.channels();
        let mut out = Vec4::ZERO;
        for c in 0..ch {
            out[c] = self.data[base + c];
        }
        out
    }

    /// Write a texel; channels beyond the format's are dropped.
    pub fn set_texel(&mut self, x: u32, y: u32, value: Vec4) {
        let base = self.texel_index(x, y);
        let ch = self.desc.format.channels();
        for c in 0..ch {
            self.data[base + c] = value[c];
        }
    }

    /// Fill every texel with the same value.
    pub fn fill(&mut self, value: Vec4) {
        let ch = self.desc.format.channels();
        for texel in self.data.chunks_exact_mut(ch) {
            for (c, slot) in texel.iter_mut().enumerate() {
                *slot = value[c];
            }
        }
    }

    /// Bilinear sample at normalized UV with clamp-to-edge addressing.
    ///
    /// Texel centers sit at `(x + 0.5) / width`, matching linear-filtering
    /// hardware; the blur tap tables depend on this convention.
    #[must_use]
    pub fn sample_bilinear(&self, u: f32, v: f32) -> Vec4 {
        let w = self.desc.width as f32;
        let h = self.desc.height as f32;
        let x = u * w - 0.5;
        let y = v * h - 0.5;

        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let clamp_x = |t: f32| (t.max(0.0) as u32).min(self.desc.width - 1);
        let clamp_y = |t: f32| (t.max(0.0) as u32).min(self.desc.height - 1);

        let (x0i, x1i) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (y0i, y1i) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let top = self.texel(x0i, y0i).lerp(self.texel(x1i, y0i), fx);
        let bottom = self.texel(x0i, y1i).lerp(self.texel(x1i, y1i), fx);
        top.lerp(bottom, fy)
    }

    pub(crate) fn take_data(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.data)
    }

    pub(crate) fn restore_data(&mut self, data: Vec<f32>) {
        debug_assert_eq!(
            data.len(),
            self.desc.width as usize * self.desc.height as usize * self.desc.format.channels()
        );
        self.data = data;
    }
}

/// Arena of 2D surfaces addressed by [`SurfaceKey`].
///
/// Not `Sync`; like the rest of the device it is owned by a single render
/// thread. Keys carry a generation, so a key left over from before a resize
/// simply fails to resolve instead of dangling.
#[derive(Default)]
pub struct SurfacePool {
    surfaces: SlotMap<SurfaceKey, Surface>,
    allocation_count: u64,
}

impl SurfacePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new surface, zero-initialized.
    pub fn create_2d(&mut self, desc: SurfaceDesc) -> SurfaceKey {
        self.allocation_count += 1;
        log::debug!(
            "surface alloc #{}: {}x{} {:?}",
            self.allocation_count,
            desc.width,
            desc.height,
            desc.format
        );
        self.surfaces.insert(Surface::new(desc))
    }

    /// Idempotent create-or-resize.
    ///
    /// Returns `existing` unchanged when it is live and its descriptor
    /// matches `desc`; otherwise releases it (if any) and allocates anew,
    /// invalidating the old key.
    pub fn create_or_resize_2d(&mut self, existing: Option<SurfaceKey>, desc: SurfaceDesc) -> SurfaceKey {
        if let Some(key) = existing {
            if let Some(surface) = self.surfaces.get(key) {
                if surface.desc == desc {
                    return key;
                }
            }
            self.surfaces.remove(key);
        }
        self.create_2d(desc)
    }

    /// Release a surface; later lookups through the key return `None`.
    pub fn destroy(&mut self, key: SurfaceKey) {
        self.surfaces.remove(key);
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: SurfaceKey) -> Option<&Surface> {
        self.surfaces.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: SurfaceKey) -> Option<&mut Surface> {
        self.surfaces.get_mut(key)
    }

    /// Total number of allocations performed since creation. Reallocation
    /// tests key off this.
    #[inline]
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count
    }
}
