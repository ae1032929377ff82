//! Gaussian kernel derivation and bilinear tap compression
//!
//! Builds the discrete separable Gaussian for a `(sigma, radius)` pair and
//! folds it into a table of `(offset, weight)` taps that exploits bilinear
//! filtering: two adjacent unit-spaced kernel entries become one sample
//! positioned between their texel centers, weighted to reproduce the same
//! blend. This roughly halves the fetch count per blur axis.

use crate::errors::{PostFxError, Result};

/// One bilinear-compressed tap. `offset` is in texels from the kernel
/// center along the blur axis; the table is applied symmetrically with the
/// mirrored samples averaged, so the weights sum to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurTap {
    pub offset: f32,
    pub weight: f32,
}

/// Sample the Gaussian density at integer offsets `0..size` around
/// `size / 2`, normalized to sum 1.
///
/// The square-root form is deliberate: sampling multiplies consecutive
/// weights, squaring the value back to the true Gaussian and preserving
/// precision at the small weights near the kernel edge.
fn generate_separable_gauss_kernel(sigma: f32, kernel_size: usize) -> Vec<f32> {
    debug_assert!(kernel_size % 2 == 1, "kernel size must be odd");

    let sigma = f64::from(sigma);
    let mean = (kernel_size / 2) as f64;

    let mut kernel = Vec::with_capacity(kernel_size);
    let mut sum = 0.0_f64;
    for x in 0..kernel_size {
        let x = x as f64;
        let w = (f64::exp(-0.5 * (((x - mean) / sigma).powi(2) + (mean / sigma).powi(2)))
            / (2.0 * std::f64::consts::PI * sigma * sigma))
            .sqrt();
        sum += w;
        kernel.push(w);
    }
    kernel.iter().map(|w| (*w / sum) as f32).collect()
}

/// Fold a full odd-length kernel into the one-sided bilinear tap table.
///
/// The center tap is halved (it is shared with the mirrored side) and the
/// one-sided half renormalized to sum 1, then zero-padded to an even count
/// and paired: weight `a + b`, offset `2*i + b / (a + b)`. Treat as a fixed
/// transform; the blur routines average the mirrored samples to compensate
/// for the doubled coverage.
fn compress_to_bilinear_taps(kernel: &[f32]) -> Vec<BlurTap> {
    if kernel.is_empty() {
        return Vec::new();
    }
    debug_assert!(kernel.len() % 2 == 1);

    let half = kernel.len() / 2;
    let mut one_side: Vec<f32> = Vec::with_capacity(half + 2);
    one_side.push(kernel[half] * 0.5);
    one_side.extend_from_slice(&kernel[half + 1..]);

    let side_sum: f32 = one_side.iter().sum();
    if side_sum > 0.0 {
        for w in &mut one_side {
            *w /= side_sum;
        }
    }
    if one_side.len() % 2 == 1 {
        one_side.push(0.0);
    }

    let mut taps = Vec::with_capacity(one_side.len() / 2);
    for (i, pair) in one_side.chunks_exact(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        let weight = a + b;
        let offset = if weight == 0.0 {
            0.0
        } else {
            i as f32 * 2.0 + b / weight
        };
        taps.push(BlurTap { offset, weight });
    }
    taps
}

/// Cached `(sigma, radius)` → tap-table derivation.
///
/// Recomputes only when sigma moves beyond `1e-5` or the radius changes;
/// rejected parameters leave the previous state untouched.
#[derive(Default, Debug)]
pub struct KernelOptimizer {
    sigma: f32,
    radius: i32,
    kernel: Vec<f32>,
    taps: Vec<BlurTap>,
}

impl KernelOptimizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate parameters and (re)derive the kernel and tap table.
    ///
    /// `radius == -1` picks the default `ceil(sigma * 5)` — an ad-hoc
    /// heuristic keeping precision good over an HDR range of roughly
    /// `[0, 1000]` for sensible sigmas.
    ///
    /// Returns `Ok(true)` when the tables changed, `Ok(false)` for a cached
    /// no-op hit.
    pub fn update(&mut self, sigma: f32, radius: i32) -> Result<bool> {
        if sigma <= 0.0 {
            return Err(PostFxError::InvalidSigma(sigma));
        }
        let sigma = sigma.clamp(0.1, 256.0);
        let radius = if radius == -1 {
            (sigma * 5.0).ceil() as i32
        } else {
            radius
        };
        if radius <= 0 || radius > 2048 {
            return Err(PostFxError::InvalidRadius(radius));
        }
        let radius_f = radius as f32;
        if radius_f <= sigma || radius_f >= sigma * 12.0 {
            return Err(PostFxError::InvalidKernelRatio { radius, sigma });
        }

        if radius == self.radius && (sigma - self.sigma).abs() < 1e-5 {
            return Ok(false);
        }

        self.sigma = sigma;
        self.radius = radius;
        self.kernel = generate_separable_gauss_kernel(sigma, radius as usize * 2 + 1);
        self.taps = compress_to_bilinear_taps(&self.kernel);
        log::debug!(
            "blur kernel rebuilt: sigma {sigma}, radius {radius}, {} taps",
            self.taps.len()
        );
        Ok(true)
    }

    /// The full normalized Gaussian kernel (odd length `2*radius + 1`).
    #[must_use]
    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }

    /// The one-sided bilinear tap table, center-most pair first.
    #[must_use]
    pub fn taps(&self) -> &[BlurTap] {
        &self.taps
    }

    #[must_use]
    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    #[must_use]
    pub fn radius(&self) -> i32 {
        self.radius
    }
}
