//! Shader library and background kernel compilation
//!
//! Kernels are native routines registered in a [`ShaderLibrary`] under a
//! `module::entry_point` name, mirroring how the real renderer addresses its
//! shader files. [`ShaderCache::compile`] resolves an entry on a background
//! thread and returns a [`KernelKey`] immediately; a dispatch that needs the
//! kernel blocks on that kernel's completion only, so unrelated passes are
//! never serialized behind a slow compile.

use std::sync::Arc;

use glam::{UVec2, Vec4};
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::errors::{PostFxError, Result};

use super::context::KernelIo;

/// Compute routine: one call per global invocation id.
pub type ComputeFn = fn(UVec2, &mut KernelIo);

/// Fullscreen pixel routine: returns the color for one render-target pixel.
/// May also write side UAVs through the [`KernelIo`].
pub type PixelFn = fn(UVec2, &mut KernelIo) -> Vec4;

/// A resolved kernel: the routine plus its thread-group geometry.
#[derive(Clone, Copy)]
pub enum KernelRoutine {
    Compute(ComputeFn),
    Pixel(PixelFn),
}

/// Entry in the shader library.
#[derive(Clone, Copy)]
pub struct CompiledKernel {
    pub routine: KernelRoutine,
    /// Thread-group size used to expand a group count into invocations.
    /// Irrelevant for pixel routines (they run per render-target pixel).
    pub group_size: UVec2,
}

/// Named registry of software kernel routines.
///
/// Plays the role of the on-disk shader source tree: effects address kernels
/// by `(module, entry_point)` and macro set, and the "compiler" validates the
/// name against this registry.
#[derive(Default, Clone)]
pub struct ShaderLibrary {
    entries: FxHashMap<(String, String), CompiledKernel>,
}

impl ShaderLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compute routine with its thread-group size.
    pub fn register_compute(&mut self, module: &str, entry: &str, group_size: UVec2, routine: ComputeFn) {
        self.entries.insert(
            (module.to_owned(), entry.to_owned()),
            CompiledKernel {
                routine: KernelRoutine::Compute(routine),
                group_size,
            },
        );
    }

    /// Register a fullscreen pixel routine.
    pub fn register_pixel(&mut self, module: &str, entry: &str, routine: PixelFn) {
        self.entries.insert(
            (module.to_owned(), entry.to_owned()),
            CompiledKernel {
                routine: KernelRoutine::Pixel(routine),
                group_size: UVec2::ONE,
            },
        );
    }

    fn resolve(&self, module: &str, entry: &str) -> Result<CompiledKernel> {
        self.entries
            .get(&(module.to_owned(), entry.to_owned()))
            .copied()
            .ok_or_else(|| PostFxError::ShaderEntryNotFound {
                module: module.to_owned(),
                entry: entry.to_owned(),
            })
    }
}

new_key_type! {
    /// Handle to a (possibly still compiling) kernel.
    pub struct KernelKey;
}

enum KernelState {
    /// Compile in flight; the receiver completes exactly once.
    Pending(flume::Receiver<Result<CompiledKernel>>),
    Ready(CompiledKernel),
    Failed(String),
}

struct KernelSlot {
    module: String,
    entry: String,
    state: KernelState,
}

/// Compiled-kernel arena with background resolution.
pub struct ShaderCache {
    library: Arc<ShaderLibrary>,
    kernels: SlotMap<KernelKey, KernelSlot>,
}

impl ShaderCache {
    #[must_use]
    pub fn new(library: ShaderLibrary) -> Self {
        Self {
            library: Arc::new(library),
            kernels: SlotMap::with_key(),
        }
    }

    /// Start compiling `module::entry` in the background.
    ///
    /// `macros` is accepted for parity with the real shader pipeline; the
    /// software library has no conditional compilation, so it only feeds the
    /// compile log.
    pub fn compile(&mut self, module: &str, entry: &str, macros: &[(String, String)]) -> KernelKey {
        let (tx, rx) = flume::bounded(1);
        let library = Arc::clone(&self.library);
        let (m, e) = (module.to_owned(), entry.to_owned());
        log::debug!("compiling kernel {m}::{e} ({} macros)", macros.len());
        std::thread::spawn(move || {
            let _ = tx.send(library.resolve(&m, &e));
        });
        self.kernels.insert(KernelSlot {
            module: module.to_owned(),
            entry: entry.to_owned(),
            state: KernelState::Pending(rx),
        })
    }

    /// Block until the kernel is resolved; returns the routine or the
    /// compile error. Waits on this kernel only.
    pub fn wait_ready(&mut self, key: KernelKey) -> Result<CompiledKernel> {
        let slot = self.kernels.get_mut(key).ok_or(PostFxError::KernelLost)?;
        let rx = match &slot.state {
            KernelState::Ready(kernel) => return Ok(*kernel),
            KernelState::Failed(reason) => {
                return Err(PostFxError::ShaderCompileFailed {
                    module: slot.module.clone(),
                    entry: slot.entry.clone(),
                    reason: reason.clone(),
                });
            }
            KernelState::Pending(rx) => rx.clone(),
        };
        let outcome = rx.recv().unwrap_or_else(|_| {
            Err(PostFxError::ShaderCompileFailed {
                module: slot.module.clone(),
                entry: slot.entry.clone(),
                reason: "compile worker disappeared".to_owned(),
            })
        });
        match outcome {
            Ok(kernel) => {
                slot.state = KernelState::Ready(kernel);
                Ok(kernel)
            }
            Err(err) => {
                log::warn!("kernel {}::{} failed to compile: {err}", slot.module, slot.entry);
                slot.state = KernelState::Failed(err.to_string());
                Err(err)
            }
        }
    }
}
