//! Grid smoke solver.
//!
//! Velocity lives in UV units per second on a collocated, cell-centered grid.
//! Differential operators convert to cell units with the per-axis resolution,
//! so the projection stays consistent on non-square grids. Every pass reads
//! one buffer and writes another; the caller swaps afterwards.

use crate::pingpong::PingPong;
use crate::{Field2, Grid2, Vec2, VecField2};

pub const DEFAULT_MAX_DT: f32 = 1.0 / 60.0;
pub const DEFAULT_PRESSURE_ITERS: usize = 50;
pub const DEFAULT_JET_COUNT: usize = 7;
const NORMALIZE_EPS: f32 = 1e-5;
const COUNT_EPS: f32 = 1e-5;
const RADIUS_EPS: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JetParams {
    pub count: usize,
    /// Vertical emission height in UV.
    pub height: f32,
    /// Downward velocity added at a jet's centre, UV/s.
    pub velocity: f32,
    pub dye_strength: f32,
    /// Fraction of existing dye removed each time a jet is applied.
    pub dye_decay: f32,
}

impl Default for JetParams {
    fn default() -> Self {
        Self {
            count: DEFAULT_JET_COUNT,
            height: 0.02,
            velocity: 0.65,
            dye_strength: 0.8,
            dye_decay: 0.005,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverParams {
    pub max_dt: f32,
    pub velocity_dissipation: f32,
    pub dye_dissipation: f32,
    /// Downward acceleration, UV/s^2.
    pub gravity: f32,
    pub vorticity: f32,
    pub pressure_iters: usize,
    pub jets: JetParams,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_dt: DEFAULT_MAX_DT,
            velocity_dissipation: 0.0,
            dye_dissipation: 0.006,
            gravity: 0.45,
            vorticity: 30.0,
            pressure_iters: DEFAULT_PRESSURE_ITERS,
            jets: JetParams::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceParams {
    pub dt: f32,
    pub vorticity: f32,
    pub gravity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdvectParams {
    pub dt: f32,
    pub dissipation: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressureParams {
    pub iterations: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmitParams {
    pub time: f32,
    pub jets: JetParams,
}

/// Clamps a frame delta into `[0, max_dt]`; non-finite input becomes 0.
pub fn clamp_dt(dt: f32, max_dt: f32) -> f32 {
    if !dt.is_finite() || dt <= 0.0 {
        return 0.0;
    }
    dt.min(max_dt.max(0.0))
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let span = edge1 - edge0;
    let span = if span.abs() < RADIUS_EPS {
        RADIUS_EPS.copysign(span)
    } else {
        span
    };
    let t = ((x - edge0) / span).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Velocity at `(x, y)` in cells per second, with clamp-to-edge lookup.
fn cell_velocity(velocity: &VecField2, x: i32, y: i32, res: Vec2) -> Vec2 {
    velocity.sample_clamped(x, y).mul(res)
}

pub fn compute_curl_into(velocity: &VecField2, out: &mut Field2) {
    let res = velocity.grid().resolution();
    out.fill_with_index(|x, y| {
        let (x, y) = (x as i32, y as i32);
        let right = cell_velocity(velocity, x + 1, y, res);
        let left = cell_velocity(velocity, x - 1, y, res);
        let down = cell_velocity(velocity, x, y + 1, res);
        let up = cell_velocity(velocity, x, y - 1, res);
        0.5 * ((right.y - left.y) - (down.x - up.x))
    });
}

/// Vorticity confinement plus gravity, masked by the obstacle field.
pub fn apply_forces_into(
    velocity: &VecField2,
    curl: &Field2,
    obstacles: &Field2,
    params: ForceParams,
    out: &mut VecField2,
) {
    let texel = velocity.grid().texel();
    let gravity = Vec2::new(0.0, params.gravity);
    out.fill_with_index(|x, y| {
        let (xi, yi) = (x as i32, y as i32);
        let grad = Vec2::new(
            curl.sample_clamped(xi + 1, yi).abs() - curl.sample_clamped(xi - 1, yi).abs(),
            curl.sample_clamped(xi, yi + 1).abs() - curl.sample_clamped(xi, yi - 1).abs(),
        )
        .scale(0.5);
        let n = grad.normalize_eps(NORMALIZE_EPS);
        let w = curl.get(x, y);
        let confinement = Vec2::new(n.y, -n.x).scale(params.vorticity * w).mul(texel);
        let accel = confinement.add(gravity);
        velocity
            .get(x, y)
            .add(accel.scale(params.dt))
            .scale(obstacles.get(x, y))
    });
}

/// Semi-Lagrangian self-advection of velocity.
pub fn advect_velocity_into(
    velocity: &VecField2,
    obstacles: &Field2,
    params: AdvectParams,
    out: &mut VecField2,
) {
    let grid = velocity.grid();
    let decay = (-params.dissipation.max(0.0) * params.dt).exp();
    out.fill_with_index(|x, y| {
        let origin = grid.clamp_uv(grid.cell_center(x, y).sub(velocity.get(x, y).scale(params.dt)));
        let source_mask = obstacles.sample_nearest(origin);
        velocity
            .sample_linear(origin)
            .scale(source_mask * decay * obstacles.get(x, y))
    });
}

/// Semi-Lagrangian advection of a scalar on its own grid through `velocity`.
pub fn advect_scalar_into(
    source: &Field2,
    velocity: &VecField2,
    obstacles: &Field2,
    params: AdvectParams,
    out: &mut Field2,
) {
    source.assert_same_grid(out);
    let grid = source.grid();
    let decay = (-params.dissipation.max(0.0) * params.dt).exp();
    out.fill_with_index(|x, y| {
        let uv = grid.cell_center(x, y);
        let origin = grid.clamp_uv(uv.sub(velocity.sample_linear(uv).scale(params.dt)));
        let source_mask = obstacles.sample_nearest(origin);
        (source.sample_linear(origin) * source_mask * decay).max(0.0)
    });
}

/// Central-difference divergence in cell units; solid neighbours contribute
/// zero flux and solid cells report zero.
pub fn compute_divergence_into(velocity: &VecField2, obstacles: &Field2, out: &mut Field2) {
    let res = velocity.grid().resolution();
    out.fill_with_index(|x, y| {
        let (xi, yi) = (x as i32, y as i32);
        let side = |dx: i32, dy: i32| {
            cell_velocity(velocity, xi + dx, yi + dy, res)
                .scale(obstacles.sample_clamped(xi + dx, yi + dy))
        };
        let right = side(1, 0);
        let left = side(-1, 0);
        let down = side(0, 1);
        let up = side(0, -1);
        0.5 * ((right.x - left.x) + (down.y - up.y)) * obstacles.get(x, y)
    });
}

/// Weighted neighbour sum and fluid-neighbour count around a cell.
fn neighbor_sum_count(pressure: &Field2, obstacles: &Field2, x: i32, y: i32) -> (f32, f32) {
    let mut sum = 0.0;
    let mut count = 0.0;
    for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        let open = obstacles.sample_clamped(x + dx, y + dy);
        sum += pressure.sample_clamped(x + dx, y + dy) * open;
        count += open;
    }
    (sum, count)
}

/// One Jacobi sweep of the pressure Poisson equation.
pub fn jacobi_pressure_into(
    pressure: &Field2,
    divergence: &Field2,
    obstacles: &Field2,
    out: &mut Field2,
) {
    out.fill_with_index(|x, y| {
        let (sum, count) = neighbor_sum_count(pressure, obstacles, x as i32, y as i32);
        (sum - divergence.get(x, y)) / (count + COUNT_EPS) * obstacles.get(x, y)
    });
}

/// Clears pressure and runs the fixed number of Jacobi sweeps.
pub fn solve_pressure(
    pressure: &mut PingPong<Field2>,
    divergence: &Field2,
    obstacles: &Field2,
    params: PressureParams,
) {
    pressure.read_mut().fill(0.0);
    for _ in 0..params.iterations {
        let (read, write) = pressure.split();
        jacobi_pressure_into(read, divergence, obstacles, write);
        pressure.swap();
    }
}

/// Count-weighted L2 norm of the Poisson residual over fluid cells. Jacobi
/// sweeps never increase it.
pub fn pressure_residual(pressure: &Field2, divergence: &Field2, obstacles: &Field2) -> f32 {
    let grid = pressure.grid();
    let mut total = 0.0_f64;
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            if obstacles.get(x, y) == 0.0 {
                continue;
            }
            let (sum, count) = neighbor_sum_count(pressure, obstacles, x as i32, y as i32);
            if count == 0.0 {
                continue;
            }
            let r = sum - divergence.get(x, y) - count * pressure.get(x, y);
            total += f64::from(r * r / count);
        }
    }
    total.sqrt() as f32
}

pub fn subtract_gradient_into(
    velocity: &VecField2,
    pressure: &Field2,
    obstacles: &Field2,
    out: &mut VecField2,
) {
    let texel = velocity.grid().texel();
    out.fill_with_index(|x, y| {
        let (xi, yi) = (x as i32, y as i32);
        let grad = Vec2::new(
            pressure.sample_clamped(xi + 1, yi) - pressure.sample_clamped(xi - 1, yi),
            pressure.sample_clamped(xi, yi + 1) - pressure.sample_clamped(xi, yi - 1),
        )
        .scale(0.5)
        .mul(texel);
        velocity.get(x, y).sub(grad).scale(obstacles.get(x, y))
    });
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Jet {
    pub center: Vec2,
    pub radius: f32,
    pub strength: f32,
}

/// Position, radius and strength of jet `index` at `time` seconds.
pub fn jet_state(index: usize, params: JetParams, time: f32) -> Jet {
    let i = index as f32;
    let phase = i / params.count.max(1) as f32;
    let u = 0.1 + 0.8 * phase + 0.05 * (time * 0.9 + i * 1.13).sin();
    let radius = 0.025 + 0.015 * (time * 1.7 + i * 2.3).sin();
    let strength = 0.9 + 0.4 * (time * 2.1 + i * 0.7).sin();
    Jet {
        center: Vec2::new(u, params.height),
        radius,
        strength,
    }
}

fn jet_weight(jet: &Jet, uv: Vec2) -> f32 {
    smoothstep(jet.radius.max(RADIUS_EPS), 0.0, uv.sub(jet.center).length())
}

pub fn emit_velocity_into(
    velocity: &VecField2,
    obstacles: &Field2,
    params: EmitParams,
    out: &mut VecField2,
) {
    let grid = velocity.grid();
    let jets: Vec<Jet> = (0..params.jets.count)
        .map(|i| jet_state(i, params.jets, params.time))
        .collect();
    out.fill_with_index(|x, y| {
        let uv = grid.cell_center(x, y);
        let push: f32 = jets.iter().map(|jet| jet_weight(jet, uv)).sum();
        velocity
            .get(x, y)
            .add(Vec2::new(0.0, params.jets.velocity * push))
            .scale(obstacles.get(x, y))
    });
}

/// Applies every jet to the dye field. Returns the dye mass added on top of
/// the decayed previous field.
pub fn emit_dye_into(dye: &Field2, obstacles: &Field2, params: EmitParams, out: &mut Field2) -> f32 {
    dye.assert_same_grid(out);
    let grid = dye.grid();
    let keep = (1.0 - params.jets.dye_decay).clamp(0.0, 1.0);
    let jets: Vec<Jet> = (0..params.jets.count)
        .map(|i| jet_state(i, params.jets, params.time))
        .collect();
    out.fill_with_index(|x, y| {
        let uv = grid.cell_center(x, y);
        let open = obstacles.sample_nearest(uv);
        jets.iter().fold(dye.get(x, y), |value, jet| {
            let add = jet_weight(jet, uv) * jet.strength.max(0.0) * params.jets.dye_strength;
            value * keep + add * open
        })
    });
    let kept = dye.sum() * keep.powi(jets.len() as i32);
    (out.sum() - kept).max(0.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimStats {
    pub dye_total: f32,
    pub dye_max: f32,
    pub emitted_total: f64,
    pub max_speed: f32,
    pub finite: bool,
    pub steps: u64,
}

/// Simulation context: owns every grid buffer and advances them one frame at
/// a time. Created on init, re-created on resize, dropped on dispose.
#[derive(Clone, Debug)]
pub struct SmokeSim {
    params: SolverParams,
    velocity: PingPong<VecField2>,
    dye: PingPong<Field2>,
    pressure: PingPong<Field2>,
    divergence: Field2,
    curl: Field2,
    obstacles: Field2,
    time: f32,
    emitted: f64,
    steps: u64,
}

impl SmokeSim {
    pub fn new(params: SolverParams, sim_grid: Grid2, dye_grid: Grid2) -> Self {
        Self {
            params,
            velocity: PingPong::new(VecField2::new(sim_grid, Vec2::zero())),
            dye: PingPong::new(Field2::new(dye_grid, 0.0)),
            pressure: PingPong::new(Field2::new(sim_grid, 0.0)),
            divergence: Field2::new(sim_grid, 0.0),
            curl: Field2::new(sim_grid, 0.0),
            obstacles: Field2::new(sim_grid, 1.0),
            time: 0.0,
            emitted: 0.0,
            steps: 0,
        }
    }

    /// Reallocates every buffer for new grid sizes. Contents are discarded.
    pub fn resize(&mut self, sim_grid: Grid2, dye_grid: Grid2) {
        let time = self.time;
        *self = Self::new(self.params, sim_grid, dye_grid);
        self.time = time;
    }

    pub fn params(&self) -> SolverParams {
        self.params
    }

    pub fn set_params(&mut self, params: SolverParams) {
        self.params = params;
    }

    pub fn sim_grid(&self) -> Grid2 {
        self.obstacles.grid()
    }

    pub fn dye_grid(&self) -> Grid2 {
        self.dye.read().grid()
    }

    pub fn velocity(&self) -> &VecField2 {
        self.velocity.read()
    }

    pub fn dye(&self) -> &Field2 {
        self.dye.read()
    }

    pub fn pressure(&self) -> &Field2 {
        self.pressure.read()
    }

    pub fn divergence(&self) -> &Field2 {
        &self.divergence
    }

    pub fn curl(&self) -> &Field2 {
        &self.curl
    }

    pub fn obstacles(&self) -> &Field2 {
        &self.obstacles
    }

    /// Obstacle mask on the simulation grid (1 = fluid, 0 = solid).
    pub fn obstacles_mut(&mut self) -> &mut Field2 {
        &mut self.obstacles
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Advances one frame. `dt` is clamped to `[0, max_dt]`.
    pub fn step(&mut self, dt: f32) {
        let dt = clamp_dt(dt, self.params.max_dt);
        let params = self.params;

        compute_curl_into(self.velocity.read(), &mut self.curl);

        let force = ForceParams {
            dt,
            vorticity: params.vorticity,
            gravity: params.gravity,
        };
        let (read, write) = self.velocity.split();
        apply_forces_into(read, &self.curl, &self.obstacles, force, write);
        self.velocity.swap();

        let advect = AdvectParams {
            dt,
            dissipation: params.velocity_dissipation,
        };
        let (read, write) = self.velocity.split();
        advect_velocity_into(read, &self.obstacles, advect, write);
        self.velocity.swap();

        compute_divergence_into(self.velocity.read(), &self.obstacles, &mut self.divergence);
        solve_pressure(
            &mut self.pressure,
            &self.divergence,
            &self.obstacles,
            PressureParams {
                iterations: params.pressure_iters,
            },
        );

        let (read, write) = self.velocity.split();
        subtract_gradient_into(read, self.pressure.read(), &self.obstacles, write);
        self.velocity.swap();

        let emit = EmitParams {
            time: self.time,
            jets: params.jets,
        };
        let (read, write) = self.velocity.split();
        emit_velocity_into(read, &self.obstacles, emit, write);
        self.velocity.swap();

        let (read, write) = self.dye.split();
        let added = emit_dye_into(read, &self.obstacles, emit, write);
        self.dye.swap();
        self.emitted += f64::from(added);

        let advect = AdvectParams {
            dt,
            dissipation: params.dye_dissipation,
        };
        let (read, write) = self.dye.split();
        advect_scalar_into(read, self.velocity.read(), &self.obstacles, advect, write);
        self.dye.swap();

        self.time += dt;
        self.steps += 1;
    }

    pub fn stats(&self) -> SimStats {
        let dye = self.dye.read();
        let velocity = self.velocity.read();
        let (_, dye_max) = dye.min_max();
        SimStats {
            dye_total: dye.sum(),
            dye_max,
            emitted_total: self.emitted,
            max_speed: velocity.max_length(),
            finite: dye.all_finite() && velocity.all_finite(),
            steps: self.steps,
        }
    }
}
