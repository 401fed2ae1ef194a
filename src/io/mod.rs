//! Settings files.

pub mod settings;

pub use settings::{load_settings, parse_settings, Settings};
