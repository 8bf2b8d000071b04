//! Property tests for the Jacobi pressure relaxation over random grids and
//! obstacle layouts.

use phosphor_smoke::solver::{jacobi_pressure_into, pressure_residual};
use phosphor_smoke::{Field2, Grid2, PingPong};
use proptest::prelude::*;

const SWEEPS: usize = 40;

#[derive(Debug, Clone)]
struct PressureCase {
    grid: Grid2,
    obstacles: Vec<f32>,
    divergence: Vec<f32>,
}

/// Grids from 4x4 to 40x32 with up to half of the cells solid.
fn pressure_case() -> impl Strategy<Value = PressureCase> {
    (4usize..=40, 4usize..=32, 0.0f32..=0.5).prop_flat_map(|(width, height, density)| {
        let cells = width * height;
        (
            prop::collection::vec(0.0f32..1.0, cells),
            prop::collection::vec(-1.0f32..=1.0, cells),
        )
            .prop_map(move |(draws, divergence)| PressureCase {
                grid: Grid2::new(width, height),
                obstacles: draws
                    .into_iter()
                    .map(|d| if d < density { 0.0 } else { 1.0 })
                    .collect(),
                divergence,
            })
    })
}

proptest! {
    #[test]
    fn jacobi_residual_never_increases(case in pressure_case()) {
        let width = case.grid.width();
        let mask = Field2::from_fn(case.grid, |x, y| case.obstacles[y * width + x]);
        let div = Field2::from_fn(case.grid, |x, y| {
            case.divergence[y * width + x] * case.obstacles[y * width + x]
        });
        let mut pressure = PingPong::new(Field2::new(case.grid, 0.0));
        let mut previous = pressure_residual(pressure.read(), &div, &mask);
        for sweep in 0..SWEEPS {
            let (read, write) = pressure.split();
            jacobi_pressure_into(read, &div, &mask, write);
            pressure.swap();
            let residual = pressure_residual(pressure.read(), &div, &mask);
            prop_assert!(residual.is_finite());
            prop_assert!(
                residual <= previous * (1.0 + 1e-4) + 1e-5,
                "sweep {sweep}: residual grew from {previous} to {residual}"
            );
            previous = residual;
        }
    }
}
