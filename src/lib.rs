mod field;
mod grid;
mod pingpong;
mod render;
mod vec2;
mod vec_field;

pub mod capture;
pub mod config;
pub mod effect;
pub mod frame;
pub mod gate;
pub mod hud;
pub mod lens;
pub mod obstacle;
pub mod phosphor;
pub mod remap;
pub mod solver;
pub mod tonemap;

pub use capture::{SnapshotScheduler, SnapshotSource};
pub use config::EffectConfig;
pub use effect::{ControlMessage, Effect, EffectState};
pub use field::Field2;
pub use frame::{Frame, Rgba};
pub use grid::Grid2;
pub use hud::{overlay_lines, overlay_text, GLYPH_HEIGHT, GLYPH_SPACING, GLYPH_WIDTH, LINE_SPACING};
pub use lens::{LensCoefficients, LensParams, WarpState};
pub use obstacle::{ObstacleSource, Rect};
pub use pingpong::PingPong;
pub use remap::{InputHost, RawInput, Remapper};
pub use render::{is_device_lost, Presenter};
pub use solver::{SimStats, SmokeSim, SolverParams};
pub use vec2::Vec2;
pub use vec_field::VecField2;
