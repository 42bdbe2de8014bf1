// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TracklogConfig> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        // Substitute environment variables
        let content = Self::substitute_env_vars(&content);

        // Parse YAML
        let config: TracklogConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

        // Validate configuration
        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${TRACKLOG_DATA:-data} -> data (if TRACKLOG_DATA not set)
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if let Some(default) = default_value {
                        default.to_string()
                    } else {
                        // Keep original if no default and var not found
                        format!("${{{}}}", var_name)
                    }
                }
            }
        })
        .to_string()
    }

    /// Validate configuration
    fn validate(config: &TracklogConfig) -> Result<()> {
        if config.recorder.max_datapoints == 0 {
            bail!("recorder.max_datapoints must be > 0");
        }

        if !(0.0..=1.0).contains(&config.recorder.trim_fraction) {
            bail!("recorder.trim_fraction must be within [0, 1]");
        }

        if config.recorder.max_checkpoint_files == 0 {
            bail!("recorder.max_checkpoint_files must be > 0");
        }

        if config.recorder.checkpoint_interval_seconds == Some(0) {
            bail!("recorder.checkpoint_interval_seconds must be > 0 when set");
        }

        if config.recorder.output_dir.is_empty() {
            bail!("recorder.output_dir cannot be empty");
        }

        if config.index.directory.is_empty() {
            bail!("index.directory cannot be empty");
        }

        if config.index.db_fname.is_empty() {
            bail!("index.db_fname cannot be empty");
        }

        Ok(())
    }
}
