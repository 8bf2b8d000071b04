use crate::Vec2;

pub const MIN_GRID_DIM: usize = 16;

/// Cell-centered grid covering the unit square in UV space.
///
/// Cell `(x, y)` has its centre at `((x + 0.5) / width, (y + 0.5) / height)`;
/// `y` grows downwards, matching screen space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grid2 {
    width: usize,
    height: usize,
}

impl Grid2 {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        Self { width, height }
    }

    /// Grid for a viewport in pixels, scaled by `oversample` and clamped to
    /// `[MIN_GRID_DIM, max_dim]` per axis.
    pub fn from_viewport(viewport: (u32, u32), oversample: f32, max_dim: usize) -> Self {
        let max_dim = max_dim.max(MIN_GRID_DIM);
        let scale = if oversample.is_finite() && oversample > 0.0 {
            oversample
        } else {
            1.0
        };
        let dim = |px: u32| ((px as f32 * scale).floor() as usize).clamp(MIN_GRID_DIM, max_dim);
        Self::new(dim(viewport.0), dim(viewport.1))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> usize {
        self.width * self.height
    }

    pub fn idx(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn clamp_coord(&self, x: i32, y: i32) -> (usize, usize) {
        let max_x = (self.width - 1) as i32;
        let max_y = (self.height - 1) as i32;
        let cx = x.clamp(0, max_x) as usize;
        let cy = y.clamp(0, max_y) as usize;
        (cx, cy)
    }

    /// Size of one cell in UV units.
    pub fn texel(&self) -> Vec2 {
        Vec2::new(1.0 / self.width as f32, 1.0 / self.height as f32)
    }

    /// Cells per UV unit along each axis.
    pub fn resolution(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn cell_center(&self, x: usize, y: usize) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Clamps a UV coordinate into the region whose bilinear footprint stays on
    /// the grid, i.e. half a texel in from every edge.
    pub fn clamp_uv(&self, uv: Vec2) -> Vec2 {
        let half = self.texel().scale(0.5);
        let uv = if uv.is_finite() { uv } else { Vec2::splat(0.5) };
        uv.clamp(half, Vec2::splat(1.0).sub(half))
    }

    /// Cell containing a UV coordinate, clamped to the grid.
    pub fn cell_of_uv(&self, uv: Vec2) -> (usize, usize) {
        let gx = (uv.x * self.width as f32).floor();
        let gy = (uv.y * self.height as f32).floor();
        let gx = if gx.is_finite() { gx as i32 } else { 0 };
        let gy = if gy.is_finite() { gy as i32 } else { 0 };
        self.clamp_coord(gx, gy)
    }
}
