//! Optional TOML settings file for the `wiper` CLI.
//!
//! Every field has a default, so a file only needs the keys it changes:
//!
//! ```toml
//! algorithm = "dod-3"
//!
//! [processing]
//! allow_parallel = true
//! thread_count = 4
//!
//! [engine]
//! destruction = "truncate"
//! verify_final_pass = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use wiper_engine::{EngineConfig, ProcessingSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registry name of the algorithm to use
    pub algorithm: String,
    /// Repeat count for editable algorithms
    pub repeats: Option<u32>,
    pub processing: ProcessingSettings,
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            algorithm: "zero".to_string(),
            repeats: None,
            processing: ProcessingSettings::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiper_engine::DestructionPolicy;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::parse(
            r#"
            algorithm = "schneier"

            [engine]
            destruction = "keep"
            "#,
        )
        .expect("Failed to parse settings");

        assert_eq!(settings.algorithm, "schneier");
        assert_eq!(settings.repeats, None);
        assert_eq!(settings.engine.destruction, DestructionPolicy::Keep);
        assert_eq!(settings.engine.buffer_size, EngineConfig::default().buffer_size);
        assert_eq!(settings.processing, ProcessingSettings::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::parse("").expect("Failed to parse settings");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_disk() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("wiper.toml");
        fs::write(
            &path,
            "repeats = 5\n[processing]\nallow_parallel = true\nthread_count = 3\n",
        )
        .expect("Failed to write settings");

        let settings = Settings::load(&path).expect("Failed to load settings");
        assert_eq!(settings.repeats, Some(5));
        assert!(settings.processing.allow_parallel);
        assert_eq!(settings.processing.thread_count, 3);
    }

    #[test]
    fn test_malformed_file_is_error() {
        assert!(Settings::parse("algorithm = [").is_err());
        assert!(Settings::load(Path::new("/nonexistent/wiper.toml")).is_err());
    }
}
