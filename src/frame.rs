use crate::field::should_parallel;
use crate::Vec2;
use rayon::prelude::*;

pub type Rgba = [f32; 4];

pub const BLACK: Rgba = [0.0, 0.0, 0.0, 1.0];

/// Floating point RGBA image, row-major, `y` down.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

impl Frame {
    pub fn new(width: usize, height: usize, fill: Rgba) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        Self {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> Rgba {
        self.pixels[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: Rgba) {
        let idx = y * self.width + x;
        self.pixels[idx] = value;
    }

    pub fn get_clamped(&self, x: i32, y: i32) -> Rgba {
        let cx = x.clamp(0, self.width as i32 - 1) as usize;
        let cy = y.clamp(0, self.height as i32 - 1) as usize;
        self.get(cx, cy)
    }

    /// UV of the centre of pixel `(x, y)`.
    pub fn pixel_center(&self, x: usize, y: usize) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Bilinear sample with clamp-to-edge addressing.
    pub fn sample_linear(&self, uv: Vec2) -> Rgba {
        let gx = uv.x * self.width as f32 - 0.5;
        let gy = uv.y * self.height as f32 - 0.5;
        if !gx.is_finite() || !gy.is_finite() {
            return BLACK;
        }
        let x0 = gx.floor() as i32;
        let y0 = gy.floor() as i32;
        let sx = gx - x0 as f32;
        let sy = gy - y0 as f32;
        let p00 = self.get_clamped(x0, y0);
        let p10 = self.get_clamped(x0 + 1, y0);
        let p01 = self.get_clamped(x0, y0 + 1);
        let p11 = self.get_clamped(x0 + 1, y0 + 1);
        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * sx;
            let bottom = p01[c] + (p11[c] - p01[c]) * sx;
            out[c] = top + (bottom - top) * sy;
        }
        out
    }

    pub fn fill(&mut self, value: Rgba) {
        self.pixels.fill(value);
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize) -> Rgba + Sync) {
        let width = self.width;
        if should_parallel(self.pixels.len()) {
            self.pixels.par_iter_mut().enumerate().for_each(|(i, px)| {
                *px = f(i % width, i / width);
            });
        } else {
            for (i, px) in self.pixels.iter_mut().enumerate() {
                *px = f(i % width, i / width);
            }
        }
    }

    /// Packs to RGBA8, clamping each channel to `[0, 1]`.
    pub fn write_rgba8(&self, out: &mut Vec<u8>) {
        out.resize(self.pixels.len() * 4, 0);
        for (dst, px) in out.chunks_exact_mut(4).zip(self.pixels.iter()) {
            for (d, c) in dst.iter_mut().zip(px.iter()) {
                let c = if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 };
                *d = (c * 255.0 + 0.5) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_linear_hits_pixel_centers() {
        let mut frame = Frame::new(2, 1, BLACK);
        frame.set(1, 0, [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(frame.sample_linear(frame.pixel_center(1, 0)), [1.0, 0.5, 0.0, 1.0]);
        let mid = frame.sample_linear(Vec2::new(0.5, 0.5));
        assert!((mid[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn write_rgba8_clamps_and_rounds() {
        let frame = Frame::new(1, 1, [2.0, -1.0, 0.5, f32::NAN]);
        let mut bytes = Vec::new();
        frame.write_rgba8(&mut bytes);
        assert_eq!(bytes, vec![255, 0, 128, 0]);
    }
}
