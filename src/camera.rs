//! Render camera collaborator
//!
//! Holds the exposure/tonemap/bloom settings the compositor reads each
//! frame, receives the reduced average log-luminance, and runs the
//! eye-adaptation loop that drives auto-exposure. The post-processing core
//! only ever *calls into* this type; it never hands the camera out.

use crate::gpu::{Device, SurfaceKey};

/// Exposure and auto-exposure (eye adaptation) settings.
#[derive(Clone, Copy, Debug)]
pub struct ExposureSettings {
    /// EV100; lighting upstream is pre-exposed by `exp2` of this.
    pub exposure: f32,
    /// Added post-auto-exposure, for user adjustment.
    pub exposure_compensation: f32,
    pub exposure_min: f32,
    pub exposure_max: f32,
    pub use_auto_exposure: bool,
    /// Adaptation rate; `f32::INFINITY` adapts instantly.
    pub auto_exposure_adaptation_speed: f32,
    /// Scene key value; see the auto key-value formula in [`RenderCamera::tick`].
    pub auto_exposure_key_value: f32,
    pub use_auto_auto_exposure_key_value: bool,
    /// Limit on pre-exposed color values fed into the tonemapper.
    pub hdr_clamp: f32,
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            exposure: -10.0,
            exposure_compensation: 0.0,
            exposure_min: -20.0,
            exposure_max: 20.0,
            use_auto_exposure: true,
            auto_exposure_adaptation_speed: 15.0,
            auto_exposure_key_value: 0.5,
            use_auto_auto_exposure_key_value: true,
            hdr_clamp: 64.0,
        }
    }
}

/// Tonemapping curve settings.
#[derive(Clone, Copy, Debug)]
pub struct TonemapSettings {
    /// `[0, 5]`; 1 leaves colors untouched.
    pub saturation: f32,
    pub use_modified_reinhard: bool,
    /// Luminance that maps to full white when modified Reinhard is on.
    pub modified_reinhard_white_level: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            saturation: 1.0,
            use_modified_reinhard: true,
            modified_reinhard_white_level: 6.0,
        }
    }
}

/// Bloom settings.
#[derive(Clone, Copy, Debug)]
pub struct BloomSettings {
    pub use_bloom: bool,
    /// Gaussian size as a percentage of the main view extent.
    pub bloom_size: f32,
    pub bloom_multiplier: f32,
    /// Ignore values below this (scaled by the pre-exposure multiplier).
    pub bloom_min_threshold: f32,
    /// Never transfer more than this to neighboring pixels (pre-exposed).
    pub bloom_max_clamp: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            use_bloom: false,
            bloom_size: 0.3,
            bloom_multiplier: 0.05,
            bloom_min_threshold: 0.01,
            bloom_max_clamp: 10.0,
        }
    }
}

/// Whole-pipeline toggles.
#[derive(Clone, Copy, Debug)]
pub struct GeneralSettings {
    /// When off, the compositor degrades to a pass-through copy.
    pub enable_post_process: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            enable_post_process: true,
        }
    }
}

/// All camera settings read by the compositor each frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderCameraSettings {
    pub exposure: ExposureSettings,
    pub tonemap: TonemapSettings,
    pub bloom: BloomSettings,
    pub general: GeneralSettings,
}

/// The camera/exposure collaborator.
pub struct RenderCamera {
    pub settings: RenderCameraSettings,
    /// Whether the main field of view is vertical; picks which image extent
    /// scales the bloom kernel.
    pub y_fov_main: bool,
    last_average_luminance: f32,
    had_luminance: bool,
}

impl Default for RenderCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderCamera {
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: RenderCameraSettings::default(),
            y_fov_main: true,
            last_average_luminance: 0.5,
            had_luminance: false,
        }
    }

    /// `exp2(EV100)` — the factor already baked into the radiance upstream.
    #[must_use]
    pub fn pre_exposure_multiplier(&self, include_exposure_compensation: bool) -> f32 {
        let mut ev = self.settings.exposure.exposure;
        if include_exposure_compensation {
            ev += self.settings.exposure.exposure_compensation;
        }
        ev.exp2()
    }

    /// Last scene average luminance received (linear, pre-exposure removed).
    #[must_use]
    pub fn average_luminance(&self) -> f32 {
        self.last_average_luminance
    }

    /// Whether a luminance sample has arrived since creation/reset.
    #[must_use]
    pub fn has_luminance(&self) -> bool {
        self.had_luminance
    }

    /// Intake for the reduced scene luminance; called by the compositor.
    ///
    /// `luminance_1x1` holds the average **log** luminance; the camera
    /// exponentiates it back to linear space here.
    pub fn update_luminance(&mut self, device: &Device, luminance_1x1: SurfaceKey) {
        let Some(surface) = device.surfaces().get(luminance_1x1) else {
            log::warn!("luminance update with a stale surface handle ignored");
            return;
        };
        let avg_log = surface.texel(0, 0).x;
        self.last_average_luminance = avg_log.exp();
        self.had_luminance = true;
    }

    /// Forget adaptation history (scene change, determinism between runs).
    pub fn reset_history(&mut self) {
        self.had_luminance = false;
    }

    /// Per-frame settings clamp + eye adaptation.
    pub fn tick(&mut self, delta_time: f32) {
        let s = &mut self.settings;
        s.exposure.exposure_min = s.exposure.exposure_min.clamp(-20.0, s.exposure.exposure_max);
        s.exposure.exposure_max = s.exposure.exposure_max.clamp(s.exposure.exposure_min, 20.0);
        s.exposure.exposure = s
            .exposure
            .exposure
            .clamp(s.exposure.exposure_min, s.exposure.exposure_max);
        s.exposure.auto_exposure_adaptation_speed =
            s.exposure.auto_exposure_adaptation_speed.max(0.01);
        s.exposure.auto_exposure_key_value = s.exposure.auto_exposure_key_value.clamp(0.0, 2.0);
        s.exposure.hdr_clamp = s.exposure.hdr_clamp.clamp(0.0, 65504.0);

        s.tonemap.saturation = s.tonemap.saturation.clamp(0.0, 5.0);
        s.tonemap.modified_reinhard_white_level =
            s.tonemap.modified_reinhard_white_level.clamp(0.0, f32::MAX);

        s.bloom.bloom_size = s.bloom.bloom_size.clamp(0.0, 10.0);
        s.bloom.bloom_multiplier = s.bloom.bloom_multiplier.clamp(0.0, 1.0);
        s.bloom.bloom_min_threshold = s.bloom.bloom_min_threshold.clamp(0.0, 65535.0);
        s.bloom.bloom_max_clamp = s.bloom.bloom_max_clamp.clamp(0.0, 65504.0);

        if !s.exposure.use_auto_exposure || delta_time <= 0.0 || !self.had_luminance {
            return;
        }

        let mut lerp_k = time_independent_lerp(delta_time, s.exposure.auto_exposure_adaptation_speed);
        if s.exposure.auto_exposure_adaptation_speed == f32::INFINITY {
            lerp_k = 1.0;
        }

        self.last_average_luminance = self.last_average_luminance.max(0.00001);

        // Quantize a bit to reduce frame-to-frame unpredictability.
        let quantize_scale = 1024.0;

        if s.exposure.use_auto_auto_exposure_key_value {
            // from https://mynameismjp.wordpress.com/2010/04/30/a-closer-look-at-tone-mapping/
            let key = 1.03 - 2.0 / (2.0 + (self.last_average_luminance + 1.0).log10());
            s.exposure.auto_exposure_key_value = (key * quantize_scale).round() / quantize_scale;
        }

        let linear_exposure =
            (s.exposure.auto_exposure_key_value / self.last_average_luminance).max(0.00001);
        let mut new_exposure = linear_exposure.log2();
        new_exposure = (new_exposure * quantize_scale).round() / quantize_scale;
        new_exposure = new_exposure.clamp(s.exposure.exposure_min, s.exposure.exposure_max);

        if (s.exposure.exposure - new_exposure).abs() < 1.0 / quantize_scale {
            s.exposure.exposure = new_exposure;
        } else {
            s.exposure.exposure += (new_exposure - s.exposure.exposure) * lerp_k;
        }
        s.exposure.exposure = s
            .exposure
            .exposure
            .clamp(s.exposure.exposure_min, s.exposure.exposure_max);
    }
}

/// Frame-rate independent lerp factor for an exponential approach.
fn time_independent_lerp(delta_time: f32, lerp_rate: f32) -> f32 {
    1.0 - (-delta_time * lerp_rate).exp()
}
