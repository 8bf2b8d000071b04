use crate::frame::{Frame, Rgba};
use crate::{Field2, Vec2};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneMapParams {
    pub exposure: f32,
    pub gamma: f32,
    pub opacity: f32,
    /// Shown where no element-layer snapshot is available yet.
    pub background: [f32; 3],
}

impl Default for ToneMapParams {
    fn default() -> Self {
        Self {
            exposure: 3.5,
            gamma: 1.6,
            opacity: 0.95,
            background: [0.035, 0.04, 0.055],
        }
    }
}

/// Maps a dye density to a grey smoke colour with straight alpha.
pub fn tone_map(density: f32, params: ToneMapParams) -> Rgba {
    let density = if density.is_finite() { density.max(0.0) } else { 0.0 };
    let c = 1.0 - (-params.exposure * density).exp();
    let c = c.powf(1.0 / params.gamma.max(1e-3));
    [c, c, c, c * params.opacity]
}

/// Renders the dye field into `out`, composited over `background` (or the
/// flat base colour). The result is opaque and display-referred.
pub fn render_dye_into(
    dye: &Field2,
    background: Option<&Frame>,
    params: ToneMapParams,
    out: &mut Frame,
) {
    let base = params.background;
    let (width, height) = out.size();
    let center = |x: usize, y: usize| {
        Vec2::new(
            (x as f32 + 0.5) / width as f32,
            (y as f32 + 0.5) / height as f32,
        )
    };
    out.fill_with_index(|x, y| {
        let uv = center(x, y);
        let smoke = tone_map(dye.sample_linear(uv), params);
        let under = background
            .map(|frame| frame.sample_linear(uv))
            .unwrap_or([base[0], base[1], base[2], 1.0]);
        let a = smoke[3];
        [
            smoke[0] * a + under[0] * (1.0 - a),
            smoke[1] * a + under[1] * (1.0 - a),
            smoke[2] * a + under[2] * (1.0 - a),
            1.0,
        ]
    });
}
