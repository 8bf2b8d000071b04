//! The smoke effect as one explicit context object.
//!
//! Per frame: resample obstacles when due, step the solver, tone-map the dye
//! over the latest element-layer snapshot, run the phosphor compositor and
//! finally warp the result through the lens.

use crate::config::EffectConfig;
use crate::frame::{Frame, BLACK};
use crate::gate::IntensityGate;
use crate::hud;
use crate::lens::{self, LensCoefficients, LensParams, WarpState};
use crate::obstacle::{ObstacleSampler, ObstacleSource, Rect, ResampleClock};
use crate::phosphor::{BeamParams, BeamUpdate, DecayMs, FrameTiming, Phosphor};
use crate::solver::{SimStats, SmokeSim};
use crate::tonemap::{self, ToneMapParams};
use crate::{Grid2, Vec2};
use anyhow::{Context, Result};

const STATE_LOG_INTERVAL_MS: f64 = 500.0;
const WARP_LOG_INTERVAL_MS: f64 = 1000.0;
const MAX_FRAME_MS: f64 = 1000.0;
const HUD_COLOR: [f32; 4] = [0.3, 1.0, 0.5, 0.9];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlMessage {
    WarpSlider(f32),
    /// Missing coefficients keep their desired value.
    WarpCoefficients { k1: Option<f32>, k2: Option<f32> },
    WarpEnabled(bool),
    Alive(f32),
    Halo(f32),
    Beam(BeamUpdate),
    MainsHz(f32),
    DecayMs { r: Option<f32>, g: Option<f32>, b: Option<f32> },
    ReducedMotion(bool),
    Debug(bool),
}

/// Snapshot of the tunables and runtime health, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectState {
    pub alive: f32,
    pub effective_alive: f32,
    pub fps: f32,
    pub gated: bool,
    pub reduced_motion: bool,
    pub debug: bool,
    pub decay_ms: DecayMs,
    pub halo: f32,
    pub mains_hz: f32,
    pub beam: BeamParams,
    pub warp_enabled: bool,
    pub warp_slider: f32,
    pub warp_desired: LensCoefficients,
    pub warp_current: LensCoefficients,
    pub sim: SimStats,
}

fn render_size(viewport: (u32, u32), scale: f32, max_dim: usize) -> (usize, usize) {
    let dim = |px: u32| ((px as f32 * scale).round() as usize).clamp(1, max_dim.max(1));
    (dim(viewport.0), dim(viewport.1))
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

pub struct Effect {
    config: EffectConfig,
    viewport: (u32, u32),
    sim: SmokeSim,
    sampler: ObstacleSampler,
    resample: ResampleClock,
    bounds: Vec<Rect>,
    source: Option<Box<dyn ObstacleSource>>,
    tone: ToneMapParams,
    phosphor: Phosphor,
    gate: IntensityGate,
    warp: WarpState,
    snapshot: Option<Frame>,
    smoke: Frame,
    composed: Frame,
    output: Frame,
    alive: f32,
    reduced_motion: bool,
    debug: bool,
    static_frame_ready: bool,
    last_frame_ms: Option<f64>,
    last_state_log_ms: Option<f64>,
    last_warp_log_ms: Option<f64>,
}

impl Effect {
    pub fn init(config: EffectConfig, viewport: (u32, u32)) -> Result<Self> {
        config.validate().context("effect config rejected")?;
        let viewport = (viewport.0.max(1), viewport.1.max(1));
        let solver = &config.solver;
        let sim_grid = Grid2::from_viewport(viewport, solver.sim_oversample, solver.max_texture_dim);
        let dye_grid = Grid2::from_viewport(viewport, solver.dye_oversample, solver.max_texture_dim);
        let (width, height) = render_size(viewport, config.render_scale, solver.max_texture_dim);
        let lens_config = &config.lens;
        let warp = WarpState::new(
            lens_config.coefficients(),
            lens_config.enabled,
            lens_config.ease_rate,
        );
        if let Some(slider) = lens_config.slider {
            log::debug!("warp slider preset {slider}");
        }
        let mut effect = Self {
            sim: SmokeSim::new(config.solver_params(), sim_grid, dye_grid),
            sampler: ObstacleSampler::new(solver.obstacle_inflate_px, solver.sim_oversample),
            resample: ResampleClock::new(solver.obstacle_resample_ms),
            bounds: Vec::new(),
            source: None,
            tone: ToneMapParams::default(),
            phosphor: Phosphor::new(width, height, config.phosphor_params()),
            gate: IntensityGate::new(config.gate_params()),
            warp,
            snapshot: None,
            smoke: Frame::new(width, height, BLACK),
            composed: Frame::new(width, height, BLACK),
            output: Frame::new(width, height, BLACK),
            alive: config.phosphor.alive,
            reduced_motion: config.reduced_motion,
            debug: config.debug,
            static_frame_ready: false,
            last_frame_ms: None,
            last_state_log_ms: None,
            last_warp_log_ms: None,
            viewport,
            config,
        };
        if let Some(slider) = effect.config.lens.slider {
            effect.warp.set_slider(slider);
        }
        log::info!(
            "effect initialised: viewport {}x{}, sim {}x{}, dye {}x{}, output {}x{}",
            viewport.0,
            viewport.1,
            sim_grid.width(),
            sim_grid.height(),
            dye_grid.width(),
            dye_grid.height(),
            width,
            height
        );
        Ok(effect)
    }

    /// Re-allocates every grid and buffer for a new viewport. Simulation and
    /// phosphor history are discarded.
    pub fn resize(&mut self, viewport: (u32, u32)) {
        let viewport = (viewport.0.max(1), viewport.1.max(1));
        if viewport == self.viewport {
            return;
        }
        let solver = &self.config.solver;
        let sim_grid = Grid2::from_viewport(viewport, solver.sim_oversample, solver.max_texture_dim);
        let dye_grid = Grid2::from_viewport(viewport, solver.dye_oversample, solver.max_texture_dim);
        let (width, height) = render_size(viewport, self.config.render_scale, solver.max_texture_dim);
        self.sim.resize(sim_grid, dye_grid);
        self.phosphor.resize(width, height);
        self.smoke = Frame::new(width, height, BLACK);
        self.composed = Frame::new(width, height, BLACK);
        self.output = Frame::new(width, height, BLACK);
        self.viewport = viewport;
        self.resample.mark_dirty();
        self.static_frame_ready = false;
        log::debug!(
            "effect resized to {}x{} (sim {}x{}, output {}x{})",
            viewport.0,
            viewport.1,
            sim_grid.width(),
            sim_grid.height(),
            width,
            height
        );
    }

    /// Element bounds in viewport pixels. A changed set is rasterized on the
    /// next frame; otherwise the resample timer decides.
    pub fn set_obstacles(&mut self, bounds: &[Rect]) {
        if self.bounds != bounds {
            self.bounds = bounds.to_vec();
            self.resample.mark_dirty();
            self.static_frame_ready = false;
        }
    }

    /// Element layer queried for bounds every time the resample timer fires,
    /// so elements that move without a layout notification are still tracked.
    pub fn set_obstacle_source(&mut self, source: Box<dyn ObstacleSource>) {
        self.source = Some(source);
        self.resample.mark_dirty();
        self.static_frame_ready = false;
    }

    /// Forces obstacles to be re-measured on the next frame.
    pub fn invalidate_obstacles(&mut self) {
        self.resample.mark_dirty();
        self.static_frame_ready = false;
    }

    /// Installs a fresh capture of the element layer as the backdrop.
    pub fn set_snapshot(&mut self, snapshot: Frame) {
        self.snapshot = Some(snapshot);
        self.static_frame_ready = false;
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    pub fn sim(&self) -> &SmokeSim {
        &self.sim
    }

    pub fn output(&self) -> &Frame {
        &self.output
    }

    /// Lens as currently displayed; input remapping must use the same one.
    pub fn lens_params(&self) -> LensParams {
        LensParams {
            coefficients: self.warp.current(),
            center: Vec2::new(self.config.lens.center[0], self.config.lens.center[1]),
            aspect: lens::aspect_ratio(self.viewport.0 as f32, self.viewport.1 as f32),
            iterations: self.config.lens.inverse_iterations,
        }
    }

    fn requested_alive(&self) -> f32 {
        if self.reduced_motion {
            0.0
        } else {
            self.alive
        }
    }

    pub fn state(&self) -> EffectState {
        let params = self.phosphor.params();
        EffectState {
            alive: self.alive,
            effective_alive: self.gate.effective(self.requested_alive()),
            fps: self.gate.fps(),
            gated: self.gate.is_gated(),
            reduced_motion: self.reduced_motion,
            debug: self.debug,
            decay_ms: params.decay_ms,
            halo: params.halo,
            mains_hz: params.mains_hz,
            beam: params.beam,
            warp_enabled: self.warp.enabled(),
            warp_slider: self.warp.slider(),
            warp_desired: self.warp.desired(),
            warp_current: self.warp.current(),
            sim: self.sim.stats(),
        }
    }

    pub fn apply(&mut self, message: ControlMessage) {
        log::debug!("control message {message:?}");
        match message {
            ControlMessage::WarpSlider(slider) => self.warp.set_slider(slider),
            ControlMessage::WarpCoefficients { k1, k2 } => {
                let desired = self.warp.desired();
                self.warp
                    .set_coefficients(k1.unwrap_or(desired.k1), k2.unwrap_or(desired.k2));
            }
            ControlMessage::WarpEnabled(enabled) => self.warp.set_enabled(enabled),
            ControlMessage::Alive(alive) => {
                self.alive = finite_or(alive, self.alive).clamp(0.0, 1.0);
            }
            ControlMessage::Halo(halo) => {
                let params = self.phosphor.params_mut();
                params.halo = finite_or(halo, params.halo).clamp(0.0, 1.0);
            }
            ControlMessage::Beam(update) => self.phosphor.params_mut().beam.apply(update),
            ControlMessage::MainsHz(hz) => {
                let params = self.phosphor.params_mut();
                params.mains_hz = finite_or(hz, params.mains_hz).clamp(0.1, 240.0);
            }
            ControlMessage::DecayMs { r, g, b } => {
                let decay = &mut self.phosphor.params_mut().decay_ms;
                let pick = |value: Option<f32>, current: f32| {
                    value.filter(|v| v.is_finite()).map_or(current, |v| v.max(0.01))
                };
                decay.r = pick(r, decay.r);
                decay.g = pick(g, decay.g);
                decay.b = pick(b, decay.b);
            }
            ControlMessage::ReducedMotion(reduced) => {
                if reduced != self.reduced_motion {
                    log::info!("reduced motion {}", if reduced { "on" } else { "off" });
                }
                self.reduced_motion = reduced;
                self.last_frame_ms = None;
            }
            ControlMessage::Debug(debug) => self.debug = debug,
        }
        self.static_frame_ready = false;
    }

    /// Produces the frame for `now_ms`. Under reduced motion a single static
    /// frame is rendered and then reused.
    pub fn frame(&mut self, now_ms: f64) -> &Frame {
        if self.reduced_motion {
            if !self.static_frame_ready {
                self.rasterize_obstacles_if_due(now_ms);
                self.compose(0.0, now_ms, 0.0);
                self.static_frame_ready = true;
            }
            return &self.output;
        }

        let dt_ms = match self.last_frame_ms {
            Some(last) if now_ms.is_finite() => (now_ms - last).clamp(0.0, MAX_FRAME_MS),
            _ => 0.0,
        };
        self.last_frame_ms = Some(now_ms);
        self.gate.observe_frame(now_ms);
        self.warp.advance((dt_ms / 1000.0) as f32);
        self.rasterize_obstacles_if_due(now_ms);
        self.sim.step((dt_ms / 1000.0) as f32);

        let alive = self.gate.effective(self.requested_alive());
        self.compose(dt_ms as f32, now_ms, alive);
        self.log_diagnostics(now_ms);
        &self.output
    }

    fn rasterize_obstacles_if_due(&mut self, now_ms: f64) {
        if self.resample.due(now_ms) {
            if let Some(source) = &self.source {
                self.bounds = source.obstacle_bounds();
            }
            self.sampler.update(&self.bounds, self.viewport);
            self.sampler.rasterize(self.sim.obstacles_mut());
        }
    }

    fn compose(&mut self, dt_ms: f32, now_ms: f64, alive: f32) {
        tonemap::render_dye_into(self.sim.dye(), self.snapshot.as_ref(), self.tone, &mut self.smoke);
        let timing = FrameTiming {
            dt_ms,
            time_s: (now_ms / 1000.0) as f32,
            alive,
        };
        self.phosphor.compose(&self.smoke, timing, &mut self.composed);
        let lens = self.lens_params();
        lens::warp_frame(&self.composed, &mut self.output, &lens, self.config.lens.chromatic_offset);
        if self.debug {
            lens::draw_debug_grid(&mut self.output, &lens);
            let state = self.state();
            let lines = [
                format!("FPS {:.0}", state.fps),
                format!("ALIVE {:.2}/{:.2}", state.alive, state.effective_alive),
                format!("K1 {:.4} K2 {:.4}", state.warp_current.k1, state.warp_current.k2),
                format!(
                    "WARP {} {}",
                    if state.warp_enabled { "ON" } else { "OFF" },
                    if state.gated { "GATED" } else { "" }
                ),
            ];
            hud::overlay_lines(&mut self.output, 2, 2, &lines, HUD_COLOR, 1);
        }
    }

    fn log_diagnostics(&mut self, now_ms: f64) {
        let due = |last: Option<f64>, interval: f64| last.map_or(true, |last| now_ms - last >= interval);
        if due(self.last_state_log_ms, STATE_LOG_INTERVAL_MS) {
            self.last_state_log_ms = Some(now_ms);
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("effect state {:?}", self.state());
            }
        }
        if self.debug && due(self.last_warp_log_ms, WARP_LOG_INTERVAL_MS) {
            self.last_warp_log_ms = Some(now_ms);
            let range = lens::warp_range(&self.lens_params(), self.viewport.0 as f32, self.viewport.1 as f32);
            log::debug!(
                "warp range: max displacement {:.2}px, corner scale {:.4}",
                range.max_displacement_px,
                range.corner_scale
            );
        }
    }

    /// Ends the effect's lifetime, releasing every buffer.
    pub fn dispose(self) {
        log::info!("effect disposed after {} steps", self.sim.stats().steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_effect() -> Effect {
        let mut config = EffectConfig::default();
        config.solver.sim_oversample = 0.5;
        config.solver.dye_oversample = 0.5;
        config.render_scale = 0.25;
        Effect::init(config, (96, 64)).expect("init")
    }

    #[test]
    fn frames_are_sized_and_finite() {
        let mut effect = small_effect();
        for i in 0..5 {
            let frame = effect.frame(i as f64 * 16.0);
            assert_eq!(frame.size(), (24, 16));
        }
        assert!(effect.output().pixels().iter().all(|px| px.iter().all(|c| c.is_finite())));
        assert_eq!(effect.sim().stats().steps, 5);
    }

    #[test]
    fn init_rejects_bad_config() {
        let mut config = EffectConfig::default();
        config.render_scale = f32::NAN;
        assert!(Effect::init(config, (100, 100)).is_err());
    }

    #[test]
    fn reduced_motion_renders_one_static_frame() {
        let mut effect = small_effect();
        effect.apply(ControlMessage::ReducedMotion(true));
        let first = effect.frame(0.0).clone();
        let second = effect.frame(500.0).clone();
        assert_eq!(first, second);
        assert_eq!(effect.sim().stats().steps, 0);
        assert_eq!(effect.state().effective_alive, 0.0);
    }

    #[test]
    fn control_messages_are_clamped() {
        let mut effect = small_effect();
        effect.apply(ControlMessage::Alive(4.0));
        effect.apply(ControlMessage::Halo(-1.0));
        effect.apply(ControlMessage::MainsHz(1000.0));
        effect.apply(ControlMessage::Beam(BeamUpdate {
            width_px: Some(10.0),
            ..BeamUpdate::default()
        }));
        effect.apply(ControlMessage::DecayMs {
            r: Some(20.0),
            g: None,
            b: Some(f32::NAN),
        });
        let state = effect.state();
        assert_eq!(state.alive, 1.0);
        assert_eq!(state.halo, 0.0);
        assert_eq!(state.mains_hz, 240.0);
        assert_eq!(state.beam.width_px, 3.0);
        assert_eq!(state.decay_ms.r, 20.0);
        assert_eq!(state.decay_ms.g, DecayMs::default().g);
        assert_eq!(state.decay_ms.b, DecayMs::default().b);
    }

    #[test]
    fn disabling_warp_gives_identity_lens() {
        let mut effect = small_effect();
        assert!(!effect.lens_params().is_identity());
        effect.apply(ControlMessage::WarpEnabled(false));
        assert!(effect.lens_params().is_identity());
        effect.apply(ControlMessage::WarpEnabled(true));
        effect.apply(ControlMessage::WarpCoefficients {
            k1: Some(0.5),
            k2: None,
        });
        effect.frame(0.0);
        effect.frame(2000.0);
        assert!(effect.lens_params().is_identity());
    }

    #[test]
    fn obstacles_reach_the_solver_mask() {
        let mut effect = small_effect();
        effect.set_obstacles(&[Rect::new(20.0, 10.0, 40.0, 20.0)]);
        effect.frame(0.0);
        let mask = effect.sim().obstacles();
        let grid = mask.grid();
        let (x, y) = grid.cell_of_uv(Vec2::new(40.0 / 96.0, 20.0 / 64.0));
        assert_eq!(mask.get(x, y), 0.0);
        assert_eq!(mask.get(0, 0), 1.0);
    }

    struct SharedBounds(std::rc::Rc<std::cell::RefCell<Vec<Rect>>>);

    impl ObstacleSource for SharedBounds {
        fn obstacle_bounds(&self) -> Vec<Rect> {
            self.0.borrow().clone()
        }
    }

    #[test]
    fn moving_element_is_tracked_by_the_resample_timer() {
        let mut effect = small_effect();
        let bounds = std::rc::Rc::new(std::cell::RefCell::new(vec![Rect::new(
            8.0, 16.0, 16.0, 16.0,
        )]));
        effect.set_obstacle_source(Box::new(SharedBounds(bounds.clone())));
        effect.frame(0.0);
        let grid = effect.sim().obstacles().grid();
        let left = grid.cell_of_uv(Vec2::new(16.0 / 96.0, 24.0 / 64.0));
        let right = grid.cell_of_uv(Vec2::new(80.0 / 96.0, 24.0 / 64.0));
        assert_eq!(effect.sim().obstacles().get(left.0, left.1), 0.0);
        assert_eq!(effect.sim().obstacles().get(right.0, right.1), 1.0);

        *bounds.borrow_mut() = vec![Rect::new(72.0, 16.0, 16.0, 16.0)];
        effect.frame(30.0);
        assert_eq!(effect.sim().obstacles().get(left.0, left.1), 0.0);
        effect.frame(70.0);
        assert_eq!(effect.sim().obstacles().get(left.0, left.1), 1.0);
        assert_eq!(effect.sim().obstacles().get(right.0, right.1), 0.0);
    }

    #[test]
    fn resize_reallocates_buffers() {
        let mut effect = small_effect();
        effect.frame(0.0);
        effect.resize((192, 64));
        assert_eq!(effect.frame(16.0).size(), (48, 16));
        assert_eq!(effect.sim().sim_grid().width(), 96);
    }
}
