// Copyright 2025 tracklog contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for tracklog

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::track::SaveMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TracklogConfig {
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Recorder-specific settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// Saving state the track starts in: "none", "on-demand" or
    /// "continuous".
    #[serde(default = "default_save_mode")]
    pub save_mode: SaveMode,

    /// Seconds between automatic checkpoints; absent disables
    /// checkpointing entirely.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_seconds: Option<u64>,

    /// Maximum number of non-"full" checkpoint files retained on disk.
    #[serde(default = "default_max_checkpoint_files")]
    pub max_checkpoint_files: usize,

    /// Fraction of the buffer trimmed when a run starts.
    #[serde(default = "default_trim_fraction")]
    pub trim_fraction: f64,

    /// Maximum number of samples held in memory.
    #[serde(default = "default_max_datapoints")]
    pub max_datapoints: usize,

    /// Directory for exports; checkpoints go to its `chk/` subdirectory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Fixed field schema. When set, every ingested sample must carry
    /// exactly these keys.
    #[serde(default)]
    pub field_names: Option<Vec<String>>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            save_mode: default_save_mode(),
            checkpoint_interval_seconds: default_checkpoint_interval(),
            max_checkpoint_files: default_max_checkpoint_files(),
            trim_fraction: default_trim_fraction(),
            max_datapoints: default_max_datapoints(),
            output_dir: default_output_dir(),
            field_names: None,
        }
    }
}

/// Index-specific settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexSettings {
    /// Directory holding recorded files and the persisted store.
    #[serde(default = "default_output_dir")]
    pub directory: String,

    /// File name of the persisted store inside `directory`.
    #[serde(default = "default_db_fname")]
    pub db_fname: String,

    /// Validate files against the track schema before indexing. Turning
    /// this off trusts the directory contents.
    #[serde(default = "default_validation")]
    pub validation: bool,

    /// Display aliases for remote-unit prefixes, e.g. "rm1" -> "Mast".
    #[serde(default)]
    pub rm_thesaurus: Option<HashMap<String, String>>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            db_fname: default_db_fname(),
            validation: default_validation(),
            rm_thesaurus: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_save_mode() -> SaveMode {
    SaveMode::Continuous
}
fn default_checkpoint_interval() -> Option<u64> {
    Some(120)
}
fn default_max_checkpoint_files() -> usize {
    3
}
fn default_trim_fraction() -> f64 {
    0.5
}
fn default_max_datapoints() -> usize {
    100_000
}
fn default_output_dir() -> String {
    "data".to_string()
}
fn default_db_fname() -> String {
    "tracks_metadata.json".to_string()
}
fn default_validation() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
