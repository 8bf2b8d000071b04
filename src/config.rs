use crate::capture::DEFAULT_MIN_INTERVAL_MS;
use crate::gate::GateParams;
use crate::lens::{self, LensCoefficients};
use crate::obstacle::{DEFAULT_INFLATE_PX, DEFAULT_RESAMPLE_MS};
use crate::phosphor::{BeamParams, DecayMs, PhosphorParams};
use crate::solver::{JetParams, SolverParams, DEFAULT_JET_COUNT, DEFAULT_MAX_DT, DEFAULT_PRESSURE_ITERS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_ENV: &str = "PHOSPHOR_SMOKE_CONFIG";

/// Grid sizing and fluid parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Simulation grid cells per viewport pixel.
    pub sim_oversample: f32,
    /// Dye grid cells per viewport pixel.
    pub dye_oversample: f32,
    pub max_texture_dim: usize,
    pub velocity_dissipation: f32,
    pub dye_dissipation: f32,
    pub gravity: f32,
    pub vorticity: f32,
    pub pressure_iterations: usize,
    pub max_dt: f32,
    pub jet_count: usize,
    pub obstacle_inflate_px: f32,
    pub obstacle_resample_ms: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let solver = SolverParams::default();
        Self {
            sim_oversample: 0.25,
            dye_oversample: 0.5,
            max_texture_dim: 1024,
            velocity_dissipation: solver.velocity_dissipation,
            dye_dissipation: solver.dye_dissipation,
            gravity: solver.gravity,
            vorticity: solver.vorticity,
            pressure_iterations: DEFAULT_PRESSURE_ITERS,
            max_dt: DEFAULT_MAX_DT,
            jet_count: DEFAULT_JET_COUNT,
            obstacle_inflate_px: DEFAULT_INFLATE_PX,
            obstacle_resample_ms: DEFAULT_RESAMPLE_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LensConfig {
    pub k1: f32,
    pub k2: f32,
    /// Optical centre in UV.
    pub center: [f32; 2],
    pub enabled: bool,
    /// Overrides `k1`/`k2` when set.
    pub slider: Option<f32>,
    pub ease_rate: f32,
    pub inverse_iterations: u32,
    pub chromatic_offset: f32,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            k1: lens::DEFAULT_K1,
            k2: lens::DEFAULT_K2,
            center: [0.5, 0.5],
            enabled: true,
            slider: None,
            ease_rate: lens::DEFAULT_EASE_RATE,
            inverse_iterations: lens::DEFAULT_INVERSE_ITERATIONS,
            chromatic_offset: lens::DEFAULT_CHROMATIC_OFFSET,
        }
    }
}

impl LensConfig {
    pub fn coefficients(&self) -> LensCoefficients {
        match self.slider {
            Some(slider) => LensCoefficients::from_slider(slider),
            None => LensCoefficients::new(self.k1, self.k2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeamConfig {
    pub on: bool,
    pub width_px: f32,
    pub mod_depth: f32,
    pub interlace: bool,
}

impl Default for BeamConfig {
    fn default() -> Self {
        let beam = BeamParams::default();
        Self {
            on: beam.on,
            width_px: beam.width_px,
            mod_depth: beam.mod_depth,
            interlace: beam.interlace,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecayConfig {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        let decay = DecayMs::default();
        Self {
            r: decay.r,
            g: decay.g,
            b: decay.b,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhosphorConfig {
    pub decay_ms: DecayConfig,
    pub halo: f32,
    pub bright_threshold: f32,
    pub alive: f32,
    pub mains_hz: f32,
    pub beam: BeamConfig,
}

impl Default for PhosphorConfig {
    fn default() -> Self {
        let phosphor = PhosphorParams::default();
        Self {
            decay_ms: DecayConfig::default(),
            halo: phosphor.halo,
            bright_threshold: phosphor.bright_threshold,
            alive: 1.0,
            mains_hz: phosphor.mains_hz,
            beam: BeamConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub fps_threshold: f32,
    pub gate_after_ms: f64,
    pub recover_after_ms: f64,
    pub gated_scale: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        let gate = GateParams::default();
        Self {
            fps_threshold: gate.fps_threshold,
            gate_after_ms: gate.gate_after_ms,
            recover_after_ms: gate.recover_after_ms,
            gated_scale: gate.gated_scale,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub min_interval_ms: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectConfig {
    pub solver: SolverConfig,
    pub lens: LensConfig,
    pub phosphor: PhosphorConfig,
    pub gate: GateConfig,
    pub capture: CaptureConfig,
    /// Output resolution relative to the viewport.
    pub render_scale: f32,
    pub reduced_motion: bool,
    pub debug: bool,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            lens: LensConfig::default(),
            phosphor: PhosphorConfig::default(),
            gate: GateConfig::default(),
            capture: CaptureConfig::default(),
            render_scale: 0.5,
            reduced_motion: false,
            debug: false,
        }
    }
}

fn finite_in(name: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        bail!("{name} must be within [{min}, {max}], got {value}");
    }
    Ok(())
}

impl EffectConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("failed to parse effect config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read effect config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid effect config {}", path.display()))
    }

    /// Loads from the file named by `PHOSPHOR_SMOKE_CONFIG`, or defaults when
    /// the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => {
                log::info!("loading effect config from {}", Path::new(&path).display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Rejects values the pipeline cannot run with. Lens coefficients are not
    /// checked here; out-of-range values fall back to identity at runtime.
    pub fn validate(&self) -> Result<()> {
        let s = &self.solver;
        finite_in("solver.sim_oversample", s.sim_oversample, 0.01, 4.0)?;
        finite_in("solver.dye_oversample", s.dye_oversample, 0.01, 4.0)?;
        if s.max_texture_dim < crate::grid::MIN_GRID_DIM {
            bail!(
                "solver.max_texture_dim must be at least {}, got {}",
                crate::grid::MIN_GRID_DIM,
                s.max_texture_dim
            );
        }
        finite_in("solver.velocity_dissipation", s.velocity_dissipation, 0.0, 100.0)?;
        finite_in("solver.dye_dissipation", s.dye_dissipation, 0.0, 100.0)?;
        finite_in("solver.gravity", s.gravity, -100.0, 100.0)?;
        finite_in("solver.vorticity", s.vorticity, 0.0, 1000.0)?;
        finite_in("solver.max_dt", s.max_dt, 0.0, 1.0)?;
        finite_in("solver.obstacle_inflate_px", s.obstacle_inflate_px, 0.0, 1000.0)?;
        if s.pressure_iterations == 0 {
            bail!("solver.pressure_iterations must be positive");
        }
        if !s.obstacle_resample_ms.is_finite() || s.obstacle_resample_ms < 0.0 {
            bail!("solver.obstacle_resample_ms must be non-negative");
        }

        let l = &self.lens;
        finite_in("lens.center[0]", l.center[0], 0.0, 1.0)?;
        finite_in("lens.center[1]", l.center[1], 0.0, 1.0)?;
        finite_in("lens.ease_rate", l.ease_rate, 0.0, 1000.0)?;
        finite_in("lens.chromatic_offset", l.chromatic_offset, 0.0, 0.05)?;
        if l.inverse_iterations == 0 {
            bail!("lens.inverse_iterations must be positive");
        }

        let p = &self.phosphor;
        for (name, tau) in [("r", p.decay_ms.r), ("g", p.decay_ms.g), ("b", p.decay_ms.b)] {
            finite_in(&format!("phosphor.decay_ms.{name}"), tau, 0.01, 10_000.0)?;
        }
        finite_in("phosphor.halo", p.halo, 0.0, 1.0)?;
        finite_in("phosphor.alive", p.alive, 0.0, 1.0)?;
        finite_in("phosphor.mains_hz", p.mains_hz, 0.1, 240.0)?;
        finite_in("phosphor.bright_threshold", p.bright_threshold, 0.0, 1.0)?;
        finite_in("phosphor.beam.width_px", p.beam.width_px, 0.5, 16.0)?;
        finite_in("phosphor.beam.mod_depth", p.beam.mod_depth, 0.0, 1.0)?;

        finite_in("gate.fps_threshold", self.gate.fps_threshold, 0.0, 1000.0)?;
        finite_in("gate.gated_scale", self.gate.gated_scale, 0.0, 0.3)?;
        finite_in("render_scale", self.render_scale, 0.05, 2.0)?;
        Ok(())
    }

    pub fn solver_params(&self) -> SolverParams {
        let s = &self.solver;
        SolverParams {
            max_dt: s.max_dt,
            velocity_dissipation: s.velocity_dissipation,
            dye_dissipation: s.dye_dissipation,
            gravity: s.gravity,
            vorticity: s.vorticity,
            pressure_iters: s.pressure_iterations,
            jets: JetParams {
                count: s.jet_count,
                ..JetParams::default()
            },
        }
    }

    pub fn phosphor_params(&self) -> PhosphorParams {
        let p = &self.phosphor;
        PhosphorParams {
            decay_ms: DecayMs {
                r: p.decay_ms.r,
                g: p.decay_ms.g,
                b: p.decay_ms.b,
            },
            halo: p.halo,
            bright_threshold: p.bright_threshold,
            beam: BeamParams {
                on: p.beam.on,
                width_px: p.beam.width_px,
                mod_depth: p.beam.mod_depth,
                interlace: p.beam.interlace,
            },
            mains_hz: p.mains_hz,
        }
    }

    pub fn gate_params(&self) -> GateParams {
        GateParams {
            fps_threshold: self.gate.fps_threshold,
            gate_after_ms: self.gate.gate_after_ms,
            recover_after_ms: self.gate.recover_after_ms,
            gated_scale: self.gate.gated_scale,
        }
    }
}
