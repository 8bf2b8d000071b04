use crate::{Grid2, Vec2};
use rayon::prelude::*;
use std::sync::OnceLock;

const PAR_THRESHOLD_DEFAULT: usize = 16_384;
const PAR_MIN_WORK_PER_THREAD: usize = 2048;

fn parallel_threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("SIM_PAR_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(PAR_THRESHOLD_DEFAULT)
    })
}

/// Whether a per-element loop of `len` items is worth handing to rayon.
pub(crate) fn should_parallel(len: usize) -> bool {
    if len < parallel_threshold() {
        return false;
    }
    let threads = rayon::current_num_threads().max(1);
    len / threads >= PAR_MIN_WORK_PER_THREAD
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field2 {
    grid: Grid2,
    data: Vec<f32>,
}

impl Field2 {
    pub fn new(grid: Grid2, fill: f32) -> Self {
        let data = vec![fill; grid.size()];
        Self { grid, data }
    }

    pub fn from_fn(grid: Grid2, f: impl Fn(usize, usize) -> f32 + Sync) -> Self {
        let mut field = Self::new(grid, 0.0);
        field.fill_with_index(f);
        field
    }

    pub fn grid(&self) -> Grid2 {
        self.grid
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.grid.idx(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let idx = self.grid.idx(x, y);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn sample_clamped(&self, x: i32, y: i32) -> f32 {
        let (cx, cy) = self.grid.clamp_coord(x, y);
        self.get(cx, cy)
    }

    /// Value of the cell containing `uv`.
    pub fn sample_nearest(&self, uv: Vec2) -> f32 {
        let (x, y) = self.grid.cell_of_uv(uv);
        self.get(x, y)
    }

    /// Bilinear sample at a UV coordinate; `uv` is first clamped half a texel in
    /// from the border so the footprint never wraps.
    pub fn sample_linear(&self, uv: Vec2) -> f32 {
        let uv = self.grid.clamp_uv(uv);
        let gx = uv.x * self.grid.width() as f32 - 0.5;
        let gy = uv.y * self.grid.height() as f32 - 0.5;
        let x0 = gx.floor() as i32;
        let y0 = gy.floor() as i32;
        let sx = gx - x0 as f32;
        let sy = gy - y0 as f32;
        let v00 = self.sample_clamped(x0, y0);
        let v10 = self.sample_clamped(x0 + 1, y0);
        let v01 = self.sample_clamped(x0, y0 + 1);
        let v11 = self.sample_clamped(x0 + 1, y0 + 1);
        let vx0 = v00 + (v10 - v00) * sx;
        let vx1 = v01 + (v11 - v01) * sx;
        vx0 + (vx1 - vx0) * sy
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize) -> f32 + Sync) {
        let width = self.grid.width();
        if should_parallel(self.data.len()) {
            self.data.par_iter_mut().enumerate().for_each(|(i, value)| {
                *value = f(i % width, i / width);
            });
        } else {
            for (i, value) in self.data.iter_mut().enumerate() {
                *value = f(i % width, i / width);
            }
        }
    }

    pub fn update_with_index(&mut self, f: impl Fn(usize, usize, f32) -> f32 + Sync) {
        let width = self.grid.width();
        if should_parallel(self.data.len()) {
            self.data.par_iter_mut().enumerate().for_each(|(i, value)| {
                *value = f(i % width, i / width, *value);
            });
        } else {
            for (i, value) in self.data.iter_mut().enumerate() {
                *value = f(i % width, i / width, *value);
            }
        }
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn min_max(&self) -> (f32, f32) {
        let mut iter = self.data.iter().filter(|value| value.is_finite());
        let Some(first) = iter.next() else {
            return (0.0, 0.0);
        };
        let mut min_value = *first;
        let mut max_value = *first;
        for value in iter {
            min_value = min_value.min(*value);
            max_value = max_value.max(*value);
        }
        (min_value, max_value)
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|value| value.is_finite())
    }

    pub(crate) fn assert_same_grid(&self, other: &Self) {
        assert_eq!(self.grid, other.grid, "field grid mismatch");
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

    #[test]
    fn from_fn_maps_coords() {
        let grid = Grid2::new(3, 2);
        let field = Field2::from_fn(grid, |x, y| (x + y * 10) as f32);
        assert_close(field.get(2, 1), 12.0, 1e-6);
    }

    #[test]
    fn sample_linear_matches_cell_center() {
        let grid = Grid2::new(4, 4);
        let field = Field2::from_fn(grid, |x, y| (x + y * 4) as f32);
        assert_close(field.sample_linear(grid.cell_center(2, 1)), 6.0, 1e-5);
    }

    #[test]
    fn sample_linear_interpolates_between_centers() {
        let grid = Grid2::new(4, 1);
        let field = Field2::from_fn(grid, |x, _y| x as f32);
        let uv = grid.cell_center(1, 0).add(grid.cell_center(2, 0)).scale(0.5);
        assert_close(field.sample_linear(uv), 1.5, 1e-5);
    }

    #[test]
    fn sample_linear_clamps_outside_without_wrapping() {
        let grid = Grid2::new(4, 4);
        let field = Field2::from_fn(grid, |x, _y| x as f32);
        assert_close(field.sample_linear(Vec2::new(-2.0, 0.5)), 0.0, 1e-6);
        assert_close(field.sample_linear(Vec2::new(9.0, 0.5)), 3.0, 1e-6);
    }

    #[test]
    fn sample_nearest_returns_containing_cell() {
        let grid = Grid2::new(4, 4);
        let field = Field2::from_fn(grid, |x, y| if (x, y) == (3, 0) { 1.0 } else { 0.0 });
        assert_close(field.sample_nearest(Vec2::new(0.9, 0.1)), 1.0, 0.0);
        assert_close(field.sample_nearest(Vec2::new(0.7, 0.1)), 0.0, 0.0);
    }

    #[test]
    fn update_with_index_sees_previous_value() {
        let grid = Grid2::new(2, 2);
        let mut field = Field2::new(grid, 3.0);
        field.update_with_index(|x, y, value| value + (x + y) as f32);
        assert_close(field.get(1, 1), 5.0, 1e-6);
    }

    #[test]
    fn min_max_reports_bounds() {
        let grid = Grid2::new(2, 2);
        let field = Field2::from_fn(grid, |x, y| (x + y * 2) as f32 - 1.0);
        let (min_value, max_value) = field.min_max();
        assert_close(min_value, -1.0, 1e-6);
        assert_close(max_value, 2.0, 1e-6);
    }

    #[test]
    fn all_finite_detects_nan() {
        let grid = Grid2::new(2, 2);
        let mut field = Field2::new(grid, 0.0);
        assert!(field.all_finite());
        field.set(1, 0, f32::NAN);
        assert!(!field.all_finite());
    }
}
