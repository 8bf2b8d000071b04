mod config;
mod vulkan;

pub use vulkan::{is_device_lost, Presenter};
