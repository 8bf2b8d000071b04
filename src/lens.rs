//! Radial lens distortion.
//!
//! `distort` maps a content point to where it shows on screen; `undistort`
//! is its fixed-point inverse. Rendering and input remapping both go through
//! `undistort`, so a pixel and the pointer over it always resolve to the same
//! content point.

use crate::frame::{Frame, BLACK};
use crate::Vec2;

pub const K1_LIMIT: f32 = 0.02;
pub const K2_LIMIT: f32 = 0.005;
pub const DEFAULT_INVERSE_ITERATIONS: u32 = 3;
pub const DEFAULT_EASE_RATE: f32 = 6.0;
pub const DEFAULT_K1: f32 = -0.006;
pub const DEFAULT_K2: f32 = 0.0;
pub const DEFAULT_CHROMATIC_OFFSET: f32 = 0.0015;
const SLIDER_K1: f32 = -0.012;
const SLIDER_K2: f32 = 0.004;
const DENOM_EPS: f32 = 1e-3;
const EASE_SNAP: f32 = 1e-6;
const DEBUG_GRID_COLUMNS: f32 = 20.0;
const DEBUG_GRID_ROWS: f32 = 12.0;
const DEBUG_GRID_COLOR: [f32; 3] = [0.2, 0.9, 1.0];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LensCoefficients {
    pub k1: f32,
    pub k2: f32,
}

impl LensCoefficients {
    pub const IDENTITY: Self = Self { k1: 0.0, k2: 0.0 };

    pub fn new(k1: f32, k2: f32) -> Self {
        Self { k1, k2 }
    }

    /// Coefficients for a warp strength slider in `[0, 1]`.
    pub fn from_slider(slider: f32) -> Self {
        let s = if slider.is_finite() { slider.clamp(0.0, 1.0) } else { 0.0 };
        Self::new(SLIDER_K1 * s, SLIDER_K2 * s)
    }

    pub fn is_identity(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0
    }

    /// Radial scale `1 + k1 r2 + k2 r2^2`, floored away from zero.
    pub fn denominator(&self, r2: f32) -> f32 {
        (1.0 + self.k1 * r2 + self.k2 * r2 * r2).max(DENOM_EPS)
    }
}

/// Result of [`sanitize`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sanitized {
    pub coefficients: LensCoefficients,
    /// Set when the input was out of bounds and identity was substituted.
    pub clamped: bool,
}

/// Non-finite values become 0; any value outside the safety bounds forces
/// the identity mapping.
pub fn sanitize(k1: f32, k2: f32) -> Sanitized {
    let k1 = if k1.is_finite() { k1 } else { 0.0 };
    let k2 = if k2.is_finite() { k2 } else { 0.0 };
    if k1.abs() > K1_LIMIT || k2.abs() > K2_LIMIT {
        Sanitized {
            coefficients: LensCoefficients::IDENTITY,
            clamped: true,
        }
    } else {
        Sanitized {
            coefficients: LensCoefficients::new(k1, k2),
            clamped: false,
        }
    }
}

/// Width over height; 1 for a degenerate viewport.
pub fn aspect_ratio(width: f32, height: f32) -> f32 {
    if height > 0.0 && width > 0.0 && width.is_finite() && height.is_finite() {
        width / height
    } else {
        1.0
    }
}

pub fn distort_normalized(p: Vec2, k: LensCoefficients) -> Vec2 {
    if k.is_identity() {
        return p;
    }
    p.scale(k.denominator(p.length_squared()))
}

pub fn undistort_normalized(s: Vec2, k: LensCoefficients, iterations: u32) -> Vec2 {
    if k.is_identity() {
        return s;
    }
    let mut u = s;
    for _ in 0..iterations.max(1) {
        u = s.scale(1.0 / k.denominator(u.length_squared()));
    }
    u
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LensParams {
    pub coefficients: LensCoefficients,
    pub center: Vec2,
    pub aspect: f32,
    pub iterations: u32,
}

impl Default for LensParams {
    fn default() -> Self {
        Self {
            coefficients: LensCoefficients::IDENTITY,
            center: Vec2::new(0.5, 0.5),
            aspect: 1.0,
            iterations: DEFAULT_INVERSE_ITERATIONS,
        }
    }
}

impl LensParams {
    pub fn is_identity(&self) -> bool {
        self.coefficients.is_identity()
    }

    pub fn to_normalized(&self, uv: Vec2) -> Vec2 {
        let p = uv.sub(self.center).scale(2.0);
        Vec2::new(p.x * self.aspect, p.y)
    }

    pub fn from_normalized(&self, p: Vec2) -> Vec2 {
        let aspect = if self.aspect.abs() > DENOM_EPS { self.aspect } else { 1.0 };
        Vec2::new(p.x / aspect, p.y).scale(0.5).add(self.center)
    }

    /// Screen position of content point `uv`.
    pub fn distort(&self, uv: Vec2) -> Vec2 {
        if self.is_identity() {
            return uv;
        }
        self.from_normalized(distort_normalized(self.to_normalized(uv), self.coefficients))
    }

    /// Content point shown at screen position `uv`.
    pub fn undistort(&self, uv: Vec2) -> Vec2 {
        if self.is_identity() {
            return uv;
        }
        let s = self.to_normalized(uv);
        self.from_normalized(undistort_normalized(s, self.coefficients, self.iterations))
    }
}

/// Desired vs. displayed coefficients, with easing and the clamp warning
/// latch.
#[derive(Clone, Debug)]
pub struct WarpState {
    desired: LensCoefficients,
    current: LensCoefficients,
    enabled: bool,
    slider: f32,
    ease_rate: f32,
    clamp_warned: bool,
}

impl WarpState {
    pub fn new(initial: LensCoefficients, enabled: bool, ease_rate: f32) -> Self {
        let mut state = Self {
            desired: LensCoefficients::IDENTITY,
            current: LensCoefficients::IDENTITY,
            enabled,
            slider: 0.0,
            ease_rate: if ease_rate.is_finite() { ease_rate.max(0.0) } else { DEFAULT_EASE_RATE },
            clamp_warned: false,
        };
        state.set_coefficients(initial.k1, initial.k2);
        if enabled {
            state.current = state.desired;
        }
        state
    }

    pub fn desired(&self) -> LensCoefficients {
        self.desired
    }

    /// Coefficients the renderer and the remapper should use this frame.
    pub fn current(&self) -> LensCoefficients {
        self.current
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn slider(&self) -> f32 {
        self.slider
    }

    pub fn clamp_warned(&self) -> bool {
        self.clamp_warned
    }

    /// Returns `false` when the values were rejected and identity was used.
    pub fn set_coefficients(&mut self, k1: f32, k2: f32) -> bool {
        let Sanitized {
            coefficients,
            clamped,
        } = sanitize(k1, k2);
        if clamped {
            if !self.clamp_warned {
                log::warn!(
                    "lens coefficients out of range (k1={k1}, k2={k2}); \
                     limits are |k1| <= {K1_LIMIT}, |k2| <= {K2_LIMIT}; using identity"
                );
                self.clamp_warned = true;
            }
        } else {
            self.clamp_warned = false;
        }
        self.desired = coefficients;
        !clamped
    }

    pub fn set_slider(&mut self, slider: f32) {
        self.slider = if slider.is_finite() { slider.clamp(0.0, 1.0) } else { 0.0 };
        let k = LensCoefficients::from_slider(self.slider);
        self.set_coefficients(k.k1, k.k2);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.current = LensCoefficients::IDENTITY;
        }
    }

    /// Eases the displayed coefficients toward the desired ones.
    pub fn advance(&mut self, dt_s: f32) {
        if !self.enabled {
            self.current = LensCoefficients::IDENTITY;
            return;
        }
        let dt_s = if dt_s.is_finite() { dt_s.max(0.0) } else { 0.0 };
        let t = 1.0 - (-self.ease_rate * dt_s).exp();
        let ease = |current: f32, target: f32| {
            let next = current + (target - current) * t;
            if (target - next).abs() <= EASE_SNAP {
                target
            } else {
                next
            }
        };
        self.current = LensCoefficients::new(
            ease(self.current.k1, self.desired.k1),
            ease(self.current.k2, self.desired.k2),
        );
    }
}

/// Resamples `src` through the lens into `out`. Red and blue are sampled at
/// radially offset positions; samples falling outside the content are black.
pub fn warp_frame(src: &Frame, out: &mut Frame, params: &LensParams, chromatic_offset: f32) {
    if params.is_identity() {
        let (w, h) = out.size();
        if src.size() == (w, h) {
            out.fill_with_index(|x, y| src.get(x, y));
        } else {
            out.fill_with_index(|x, y| {
                src.sample_linear(Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32))
            });
        }
        return;
    }
    let offset = if chromatic_offset.is_finite() { chromatic_offset.clamp(0.0, 0.05) } else { 0.0 };
    let scales = [1.0 + offset, 1.0, 1.0 - offset];
    let (w, h) = out.size();
    out.fill_with_index(|x, y| {
        let screen = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
        let s = params.to_normalized(screen);
        let mut rgb = [0.0; 3];
        for (c, scale) in scales.iter().enumerate() {
            let u = undistort_normalized(s.scale(*scale), params.coefficients, params.iterations);
            let uv = params.from_normalized(u);
            if (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y) {
                rgb[c] = src.sample_linear(uv)[c];
            } else {
                rgb[c] = BLACK[c];
            }
        }
        [rgb[0], rgb[1], rgb[2], 1.0]
    });
}

/// Overlays a content-space reference grid so the warp is visible.
pub fn draw_debug_grid(out: &mut Frame, params: &LensParams) {
    let (w, h) = out.size();
    let half_x = 0.75 / w as f32;
    let half_y = 0.75 / h as f32;
    let src = out.clone();
    out.fill_with_index(|x, y| {
        let px = src.get(x, y);
        let screen = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
        let u = params.undistort(screen);
        let gx = u.x * DEBUG_GRID_COLUMNS;
        let gy = u.y * DEBUG_GRID_ROWS;
        let on_x = (gx - gx.round()).abs() / DEBUG_GRID_COLUMNS <= half_x;
        let on_y = (gy - gy.round()).abs() / DEBUG_GRID_ROWS <= half_y;
        if on_x || on_y {
            [
                px[0] * 0.5 + DEBUG_GRID_COLOR[0] * 0.5,
                px[1] * 0.5 + DEBUG_GRID_COLOR[1] * 0.5,
                px[2] * 0.5 + DEBUG_GRID_COLOR[2] * 0.5,
                px[3],
            ]
        } else {
            px
        }
    });
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WarpRange {
    /// Largest screen displacement of a content point, in pixels.
    pub max_displacement_px: f32,
    /// Radial scale at the viewport corner.
    pub corner_scale: f32,
}

/// Samples the border and corners of the viewport to summarise how far the
/// warp moves content.
pub fn warp_range(params: &LensParams, width: f32, height: f32) -> WarpRange {
    let edge_points = [
        Vec2::new(0.0, 0.0),
        Vec2::new(0.5, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.5),
        Vec2::new(1.0, 0.5),
        Vec2::new(0.0, 1.0),
        Vec2::new(0.5, 1.0),
        Vec2::new(1.0, 1.0),
    ];
    let px = Vec2::new(width.max(0.0), height.max(0.0));
    let max_displacement_px = edge_points
        .iter()
        .map(|uv| params.distort(*uv).sub(*uv).mul(px).length())
        .fold(0.0_f32, f32::max);
    let corner = params.to_normalized(Vec2::new(0.0, 0.0));
    WarpRange {
        max_displacement_px,
        corner_scale: params.coefficients.denominator(corner.length_squared()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn barrel() -> LensParams {
        LensParams {
            coefficients: LensCoefficients::from_slider(1.0),
            aspect: 16.0 / 9.0,
            ..LensParams::default()
        }
    }

    #[test]
    fn identity_is_bit_exact() {
        let params = LensParams::default();
        let uv = Vec2::new(0.123_456_7, 0.987_654_3);
        assert_eq!(params.distort(uv), uv);
        assert_eq!(params.undistort(uv), uv);
    }

    #[test]
    fn undistort_inverts_distort_near_center() {
        let params = barrel();
        for &(x, y) in &[(0.5, 0.5), (0.4, 0.6), (0.3, 0.35), (0.7, 0.2)] {
            let uv = Vec2::new(x, y);
            let back = params.undistort(params.distort(uv));
            assert_close(back.x, uv.x, 1e-5);
            assert_close(back.y, uv.y, 1e-5);
        }
    }

    #[test]
    fn first_iteration_matches_single_division() {
        let k = LensCoefficients::new(-0.01, 0.002);
        let s = Vec2::new(0.6, -0.3);
        let once = undistort_normalized(s, k, 1);
        let expected = s.scale(1.0 / k.denominator(s.length_squared()));
        assert_eq!(once, expected);
    }

    #[test]
    fn normalization_round_trips() {
        let params = barrel();
        let uv = Vec2::new(0.2, 0.9);
        let back = params.from_normalized(params.to_normalized(uv));
        assert_close(back.x, uv.x, 1e-6);
        assert_close(back.y, uv.y, 1e-6);
        assert_eq!(aspect_ratio(100.0, 0.0), 1.0);
        assert_close(aspect_ratio(1920.0, 1080.0), 16.0 / 9.0, 1e-6);
    }

    #[test]
    fn sanitize_rejects_out_of_bounds() {
        assert_eq!(sanitize(0.01, -0.004).coefficients, LensCoefficients::new(0.01, -0.004));
        let bad = sanitize(0.05, 0.0);
        assert!(bad.clamped);
        assert!(bad.coefficients.is_identity());
        let nan = sanitize(f32::NAN, 0.001);
        assert!(!nan.clamped);
        assert_eq!(nan.coefficients, LensCoefficients::new(0.0, 0.001));
    }

    #[test]
    fn clamp_warning_latches_until_a_valid_value() {
        let mut warp = WarpState::new(LensCoefficients::IDENTITY, true, DEFAULT_EASE_RATE);
        assert!(!warp.set_coefficients(1.0, 0.0));
        assert!(warp.clamp_warned());
        assert!(!warp.set_coefficients(0.0, 1.0));
        assert!(warp.clamp_warned());
        assert!(warp.set_coefficients(-0.01, 0.0));
        assert!(!warp.clamp_warned());
    }

    #[test]
    fn slider_maps_to_coefficients() {
        let mut warp = WarpState::new(LensCoefficients::IDENTITY, true, DEFAULT_EASE_RATE);
        warp.set_slider(0.5);
        assert_close(warp.desired().k1, -0.006, 1e-7);
        assert_close(warp.desired().k2, 0.002, 1e-7);
        warp.set_slider(4.0);
        assert_eq!(warp.slider(), 1.0);
    }

    #[test]
    fn easing_converges_and_disable_snaps() {
        let mut warp = WarpState::new(LensCoefficients::IDENTITY, true, DEFAULT_EASE_RATE);
        warp.set_slider(1.0);
        warp.advance(1.0 / 60.0);
        let k1 = warp.current().k1;
        assert!(k1 < 0.0 && k1 > -0.012);
        for _ in 0..600 {
            warp.advance(1.0 / 60.0);
        }
        assert_eq!(warp.current(), warp.desired());
        warp.set_enabled(false);
        assert!(warp.current().is_identity());
        warp.advance(1.0);
        assert!(warp.current().is_identity());
    }

    #[test]
    fn identity_warp_copies_frame() {
        let mut src = Frame::new(4, 3, BLACK);
        src.set(2, 1, [0.3, 0.6, 0.9, 1.0]);
        let mut out = Frame::new(4, 3, [0.0; 4]);
        warp_frame(&src, &mut out, &LensParams::default(), DEFAULT_CHROMATIC_OFFSET);
        assert_eq!(out, src);
    }

    #[test]
    fn barrel_warp_preserves_center() {
        let src = Frame::new(32, 18, [0.5, 0.5, 0.5, 1.0]);
        let mut out = Frame::new(32, 18, [0.0; 4]);
        let params = barrel();
        warp_frame(&src, &mut out, &params, DEFAULT_CHROMATIC_OFFSET);
        assert_close(out.get(16, 9)[1], 0.5, 1e-5);
        let range = warp_range(&params, 32.0, 18.0);
        assert!(range.max_displacement_px > 0.0);
        assert!(range.corner_scale != 1.0);
    }

    #[test]
    fn debug_grid_marks_lines() {
        let mut out = Frame::new(200, 120, BLACK);
        draw_debug_grid(&mut out, &LensParams::default());
        assert!(out.pixels().iter().any(|px| px[1] > 0.0));
        assert!(out.pixels().iter().any(|px| px[1] == 0.0));
    }
}
