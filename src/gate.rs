//! Frame-rate gating of the compositor's intensity.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateParams {
    pub fps_threshold: f32,
    /// How long the estimate must stay below the threshold before gating.
    pub gate_after_ms: f64,
    /// How long it must stay at or above the threshold before un-gating.
    pub recover_after_ms: f64,
    /// Multiplier applied to the requested intensity while gated.
    pub gated_scale: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            fps_threshold: 30.0,
            gate_after_ms: 3000.0,
            recover_after_ms: 1500.0,
            gated_scale: 0.3,
        }
    }
}

const FPS_INITIAL: f32 = 60.0;
const FPS_KEEP: f32 = 0.9;

#[derive(Clone, Debug)]
pub struct IntensityGate {
    params: GateParams,
    fps: f32,
    gated: bool,
    last_ms: Option<f64>,
    below_since: Option<f64>,
    above_since: Option<f64>,
}

impl IntensityGate {
    pub fn new(params: GateParams) -> Self {
        Self {
            params,
            fps: FPS_INITIAL,
            gated: false,
            last_ms: None,
            below_since: None,
            above_since: None,
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Records a frame timestamp and updates the rolling estimate.
    pub fn observe_frame(&mut self, now_ms: f64) {
        if let Some(last) = self.last_ms {
            let dt = now_ms - last;
            if dt > 0.0 && dt.is_finite() {
                self.observe_fps(now_ms, (1000.0 / dt) as f32);
            }
        }
        self.last_ms = Some(now_ms);
    }

    /// Folds an instantaneous FPS sample into the estimate and advances the
    /// hysteresis timers.
    pub fn observe_fps(&mut self, now_ms: f64, fps: f32) {
        if !fps.is_finite() {
            return;
        }
        self.fps = self.fps * FPS_KEEP + fps * (1.0 - FPS_KEEP);
        if self.fps < self.params.fps_threshold {
            self.above_since = None;
            let since = *self.below_since.get_or_insert(now_ms);
            if !self.gated && now_ms - since > self.params.gate_after_ms {
                self.gated = true;
                log::info!("intensity gated: fps estimate {:.1}", self.fps);
            }
        } else {
            self.below_since = None;
            if self.gated {
                let since = *self.above_since.get_or_insert(now_ms);
                if now_ms - since > self.params.recover_after_ms {
                    self.gated = false;
                    self.above_since = None;
                    log::info!("intensity restored: fps estimate {:.1}", self.fps);
                }
            }
        }
    }

    /// Intensity to render with, given the requested one.
    pub fn effective(&self, requested: f32) -> f32 {
        let requested = requested.clamp(0.0, 1.0);
        if self.gated {
            requested * self.params.gated_scale
        } else {
            requested
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.params);
    }
}

impl Default for IntensityGate {
    fn default() -> Self {
        Self::new(GateParams::default())
    }
}
