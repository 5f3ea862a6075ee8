pub mod cli;
pub mod engine;
pub mod schedule;
pub mod stats;
pub mod utils;

pub use engine::Engine;
pub use schedule::{RunWindow, StageLabel, StageTable};
pub use utils::{parse_duration_ms, parse_elapsed_ms};
