use crate::{Field2, Vec2};

pub const DEFAULT_INFLATE_PX: f32 = 6.0;
pub const DEFAULT_RESAMPLE_MS: f64 = 60.0;

/// Axis-aligned rectangle; units depend on context (viewport pixels for
/// element bounds, UV for obstacle rects).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn inflate(&self, margin: f32) -> Self {
        Self::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x1 > x0 && y1 > y0).then(|| Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Anything that can report the viewport-space bounds of the elements smoke
/// should flow around.
pub trait ObstacleSource {
    fn obstacle_bounds(&self) -> Vec<Rect>;
}

/// Converts element bounds into UV-space obstacle rectangles and paints them
/// into a binary mask (1 = fluid, 0 = solid).
#[derive(Clone, Debug)]
pub struct ObstacleSampler {
    inflate_px: f32,
    floor_rows: usize,
    rects: Vec<Rect>,
}

impl ObstacleSampler {
    pub fn new(inflate_px: f32, sim_oversample: f32) -> Self {
        Self {
            inflate_px: inflate_px.max(0.0),
            floor_rows: floor_rows(sim_oversample),
            rects: Vec::new(),
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn floor_rows(&self) -> usize {
        self.floor_rows
    }

    /// Replaces the obstacle list from element bounds in viewport pixels.
    pub fn update(&mut self, bounds: &[Rect], viewport: (u32, u32)) {
        self.rects = normalize_bounds(bounds, viewport, self.inflate_px);
    }

    pub fn rasterize(&self, mask: &mut Field2) {
        rasterize(&self.rects, self.floor_rows, mask);
    }
}

/// Height of the solid strip along the bottom edge, in cells.
pub fn floor_rows(sim_oversample: f32) -> usize {
    let rows = (2.0 * sim_oversample).floor();
    if rows.is_finite() {
        (rows as usize).max(2)
    } else {
        2
    }
}

/// Inflates, clips and normalizes pixel bounds to UV rectangles. Degenerate or
/// non-finite bounds are dropped.
pub fn normalize_bounds(bounds: &[Rect], viewport: (u32, u32), inflate_px: f32) -> Vec<Rect> {
    if viewport.0 == 0 || viewport.1 == 0 {
        return Vec::new();
    }
    let vw = viewport.0 as f32;
    let vh = viewport.1 as f32;
    let screen = Rect::new(0.0, 0.0, vw, vh);
    bounds
        .iter()
        .filter(|rect| rect.is_finite() && rect.width > 0.0 && rect.height > 0.0)
        .filter_map(|rect| rect.inflate(inflate_px).intersect(&screen))
        .map(|rect| Rect::new(rect.x / vw, rect.y / vh, rect.width / vw, rect.height / vh))
        .collect()
}

/// Fills `mask` with fluid, marks every cell whose centre lies inside a rect as
/// solid, then adds the floor strip.
pub fn rasterize(rects: &[Rect], floor_rows: usize, mask: &mut Field2) {
    let grid = mask.grid();
    let floor_start = grid.height().saturating_sub(floor_rows);
    mask.fill_with_index(|x, y| {
        if y >= floor_start {
            return 0.0;
        }
        let center = grid.cell_center(x, y);
        if rects.iter().any(|rect| rect.contains(center)) {
            0.0
        } else {
            1.0
        }
    });
}

/// Timer that decides when obstacles are re-measured, independent of the
/// simulation frame rate.
#[derive(Clone, Debug)]
pub struct ResampleClock {
    period_ms: f64,
    last_ms: Option<f64>,
    dirty: bool,
}

impl ResampleClock {
    pub fn new(period_ms: f64) -> Self {
        Self {
            period_ms: period_ms.max(0.0),
            last_ms: None,
            dirty: true,
        }
    }

    /// Forces the next `due` call to fire, e.g. after a layout change.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn due(&mut self, now_ms: f64) -> bool {
        let elapsed = self.last_ms.map(|last| now_ms - last);
        let fire = self.dirty || elapsed.map_or(true, |elapsed| elapsed >= self.period_ms);
        if fire {
            self.dirty = false;
            self.last_ms = Some(now_ms);
        }
        fire
    }
}

impl Default for ResampleClock {
    fn default() -> Self {
        Self::new(DEFAULT_RESAMPLE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid2;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn normalize_bounds_inflates_and_clips() {
        let rects = normalize_bounds(&[Rect::new(2.0, 50.0, 20.0, 10.0)], (100, 100), 6.0);
        assert_eq!(rects.len(), 1);
        let rect = rects[0];
        assert_close(rect.x, 0.0, 1e-6);
        assert_close(rect.width, 0.28, 1e-6);
        assert_close(rect.y, 0.44, 1e-6);
        assert_close(rect.height, 0.22, 1e-6);
    }

    #[test]
    fn normalize_bounds_drops_offscreen_and_degenerate() {
        let bounds = [
            Rect::new(500.0, 500.0, 10.0, 10.0),
            Rect::new(10.0, 10.0, 0.0, 10.0),
            Rect::new(f32::NAN, 10.0, 5.0, 5.0),
        ];
        assert!(normalize_bounds(&bounds, (100, 100), 0.0).is_empty());
    }

    #[test]
    fn rasterize_marks_rect_and_floor_solid() {
        let grid = Grid2::new(10, 10);
        let mut mask = Field2::new(grid, 0.5);
        let rects = [Rect::new(0.2, 0.2, 0.2, 0.2)];
        rasterize(&rects, 2, &mut mask);
        assert_eq!(mask.get(2, 2), 0.0);
        assert_eq!(mask.get(3, 3), 0.0);
        assert_eq!(mask.get(4, 4), 1.0);
        assert_eq!(mask.get(0, 0), 1.0);
        assert_eq!(mask.get(5, 8), 0.0);
        assert_eq!(mask.get(5, 9), 0.0);
        assert_eq!(mask.get(5, 7), 1.0);
    }

    #[test]
    fn mask_is_binary() {
        let grid = Grid2::new(32, 24);
        let mut mask = Field2::new(grid, 0.0);
        rasterize(&[Rect::new(0.13, 0.37, 0.41, 0.09)], 3, &mut mask);
        assert!(mask.data().iter().all(|value| *value == 0.0 || *value == 1.0));
    }

    #[test]
    fn floor_rows_has_minimum_of_two() {
        assert_eq!(floor_rows(0.25), 2);
        assert_eq!(floor_rows(2.0), 4);
        assert_eq!(floor_rows(f32::NAN), 2);
    }

    #[test]
    fn resample_clock_fires_on_period_and_dirty() {
        let mut clock = ResampleClock::new(60.0);
        assert!(clock.due(0.0));
        assert!(!clock.due(30.0));
        assert!(clock.due(61.0));
        assert!(!clock.due(70.0));
        clock.mark_dirty();
        assert!(clock.due(71.0));
    }
}
