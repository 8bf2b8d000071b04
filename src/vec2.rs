#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub const fn splat(value: f32) -> Self {
        Self { x: value, y: value }
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s)
    }

    /// Component-wise product.
    pub fn mul(self, other: Self) -> Self {
        Self::new(self.x * other.x, self.y * other.y)
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector with `eps` added to the length, so a zero vector maps to zero
    /// instead of NaN.
    pub fn normalize_eps(self, eps: f32) -> Self {
        self.scale(1.0 / (self.length() + eps))
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self::new(self.x.clamp(min.x, max.x), self.y.clamp(min.y, max.y))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_eps_of_zero_is_zero() {
        let n = Vec2::zero().normalize_eps(1e-5);
        assert_eq!(n, Vec2::zero());
    }

    #[test]
    fn normalize_eps_is_close_to_unit() {
        let n = Vec2::new(3.0, 4.0).normalize_eps(1e-5);
        assert!((n.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clamp_limits_each_axis() {
        let v = Vec2::new(-1.0, 2.0).clamp(Vec2::zero(), Vec2::splat(1.0));
        assert_eq!(v, Vec2::new(0.0, 1.0));
    }
}
