//! Configuration loading for the narrator.
//!
//! Settings are loaded from `conf/config.toml` if present. The file may use
//! the sectioned layout (`[logging]`, `[narration]`, `[tts]`, `[storage]`) or
//! flat top-level keys. Missing or invalid entries fall back to defaults so
//! narration can still start.

mod defaults;
mod io;
mod models;
mod tables;

pub use io::{load_config, parse_config};
pub use models::{BackendKind, LogLevel, NarratorConfig};
