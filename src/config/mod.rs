// Configuration module for tracklog
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;

mod loader;

pub use loader::ConfigLoader;
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TracklogConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<TracklogConfig> {
    let mut config = load_config(path)?;

    // Allow environment variables to override config values
    if let Ok(output_dir) = std::env::var("TRACKLOG_OUTPUT_DIR") {
        config.recorder.output_dir = output_dir;
    }

    if let Ok(directory) = std::env::var("TRACKLOG_INDEX_DIR") {
        config.index.directory = directory;
    }

    Ok(config)
}
