use crate::field::should_parallel;
use crate::{Field2, Grid2, Vec2};
use rayon::prelude::*;

/// Collocated 2D vector field stored as two scalar component fields.
#[derive(Clone, Debug, PartialEq)]
pub struct VecField2 {
    u: Field2,
    v: Field2,
}

impl VecField2 {
    pub fn new(grid: Grid2, fill: Vec2) -> Self {
        Self {
            u: Field2::new(grid, fill.x),
            v: Field2::new(grid, fill.y),
        }
    }

    pub fn from_fn(grid: Grid2, f: impl Fn(usize, usize) -> Vec2 + Sync) -> Self {
        let mut field = Self::new(grid, Vec2::zero());
        field.fill_with_index(f);
        field
    }

    pub fn grid(&self) -> Grid2 {
        self.u.grid()
    }

    pub fn get(&self, x: usize, y: usize) -> Vec2 {
        Vec2::new(self.u.get(x, y), self.v.get(x, y))
    }

    pub fn set(&mut self, x: usize, y: usize, value: Vec2) {
        self.u.set(x, y, value.x);
        self.v.set(x, y, value.y);
    }

    pub fn sample_clamped(&self, x: i32, y: i32) -> Vec2 {
        Vec2::new(self.u.sample_clamped(x, y), self.v.sample_clamped(x, y))
    }

    pub fn sample_linear(&self, uv: Vec2) -> Vec2 {
        Vec2::new(self.u.sample_linear(uv), self.v.sample_linear(uv))
    }

    pub fn fill(&mut self, value: Vec2) {
        self.u.fill(value.x);
        self.v.fill(value.y);
    }

    /// Writes `f(x, y)` into every cell, evaluating `f` once per cell.
    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize) -> Vec2 + Sync) {
        let width = self.grid().width();
        let len = self.grid().size();
        let u = self.u.data_mut();
        let v = self.v.data_mut();
        if should_parallel(len) {
            u.par_iter_mut()
                .zip(v.par_iter_mut())
                .enumerate()
                .for_each(|(i, (u, v))| {
                    let value = f(i % width, i / width);
                    *u = value.x;
                    *v = value.y;
                });
        } else {
            for (i, (u, v)) in u.iter_mut().zip(v.iter_mut()).enumerate() {
                let value = f(i % width, i / width);
                *u = value.x;
                *v = value.y;
            }
        }
    }

    pub fn update_with_index(&mut self, f: impl Fn(usize, usize, Vec2) -> Vec2 + Sync) {
        let width = self.grid().width();
        let len = self.grid().size();
        let u = self.u.data_mut();
        let v = self.v.data_mut();
        if should_parallel(len) {
            u.par_iter_mut()
                .zip(v.par_iter_mut())
                .enumerate()
                .for_each(|(i, (u, v))| {
                    let value = f(i % width, i / width, Vec2::new(*u, *v));
                    *u = value.x;
                    *v = value.y;
                });
        } else {
            for (i, (u, v)) in u.iter_mut().zip(v.iter_mut()).enumerate() {
                let value = f(i % width, i / width, Vec2::new(*u, *v));
                *u = value.x;
                *v = value.y;
            }
        }
    }

    pub fn max_length(&self) -> f32 {
        self.u
            .data()
            .iter()
            .zip(self.v.data())
            .fold(0.0_f32, |acc, (u, v)| acc.max(Vec2::new(*u, *v).length()))
    }

    pub fn all_finite(&self) -> bool {
        self.u.all_finite() && self.v.all_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_samples_components() {
        let grid = Grid2::new(3, 2);
        let field = VecField2::from_fn(grid, |x, y| Vec2::new(x as f32, y as f32));
        assert_eq!(field.get(2, 1), Vec2::new(2.0, 1.0));
    }

    #[test]
    fn update_with_index_writes_both_components() {
        let grid = Grid2::new(2, 2);
        let mut field = VecField2::new(grid, Vec2::new(1.0, -1.0));
        field.update_with_index(|x, _y, value| value.scale(x as f32 + 1.0));
        assert_eq!(field.get(1, 0), Vec2::new(2.0, -2.0));
        assert_eq!(field.get(0, 1), Vec2::new(1.0, -1.0));
    }

    #[test]
    fn max_length_reports_fastest_cell() {
        let grid = Grid2::new(2, 1);
        let field = VecField2::from_fn(grid, |x, _y| Vec2::new(3.0 * x as f32, 4.0 * x as f32));
        assert!((field.max_length() - 5.0).abs() < 1e-6);
    }
}
