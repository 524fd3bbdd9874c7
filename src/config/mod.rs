//! Configuration module for voice-live.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the live
//! endpoint and audio pipeline, `AppPaths` for cross-platform directories,
//! and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{ApiConfig, AppConfig, AudioConfig, ConfigError};
