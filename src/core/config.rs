/// Engine configuration, loaded from RON.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::era::FallbackPolicy;
use crate::core::references::DEFAULT_CANONICAL_PREFIX;
use crate::core::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid storyboard range {min}..={max}")]
    StoryboardRange { min: usize, max: usize },
    #[error("canonical prefix must not be empty")]
    EmptyCanonicalPrefix,
}

/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum reference images handed to the image generator per entity.
    pub reference_limit: usize,
    /// File-name prefix that marks canonical reference images.
    pub canonical_prefix: String,
    pub unrecognized_setting: FallbackPolicy,
    /// Earlier scenes whose text is quoted back when drafting the next one.
    pub recent_scene_window: usize,
    pub min_storyboards: usize,
    pub max_storyboards: usize,
    /// Directory that reference image ids are relative to. When set,
    /// ids whose file is gone are dropped on load.
    pub image_root: Option<PathBuf>,
    pub character_references_file: String,
    pub extra_references_file: String,
    pub setting_references_file: String,
    pub introductions_file: String,
    pub continuity_dir: String,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_limit: 3,
            canonical_prefix: DEFAULT_CANONICAL_PREFIX.to_string(),
            unrecognized_setting: FallbackPolicy::default(),
            recent_scene_window: 3,
            min_storyboards: 3,
            max_storyboards: 5,
            image_root: None,
            character_references_file: "character_references.json".to_string(),
            extra_references_file: "extra_references.json".to_string(),
            setting_references_file: "setting_references.json".to_string(),
            introductions_file: "introductions.json".to_string(),
            continuity_dir: "continuity".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_ron(path: &Path) -> Result<EngineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_storyboards == 0 || self.min_storyboards > self.max_storyboards {
            return Err(ConfigError::StoryboardRange {
                min: self.min_storyboards,
                max: self.max_storyboards,
            });
        }
        if self.canonical_prefix.is_empty() {
            return Err(ConfigError::EmptyCanonicalPrefix);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = EngineConfig::parse_ron("()").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.reference_limit, 3);
        assert_eq!(config.canonical_prefix, "ref-");
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn partial_config_overrides() {
        let config = EngineConfig::parse_ron(
            r#"(
                reference_limit: 5,
                unrecognized_setting: Restrictive,
                retry: (max_retries: 2, base_delay: (secs: 1, nanos: 0)),
            )"#,
        )
        .unwrap();
        assert_eq!(config.reference_limit, 5);
        assert_eq!(config.unrecognized_setting, FallbackPolicy::Restrictive);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.continuity_dir, "continuity");
    }

    #[test]
    fn rejects_inverted_storyboard_range() {
        let err = EngineConfig::parse_ron("(min_storyboards: 6, max_storyboards: 4)").unwrap_err();
        assert!(matches!(err, ConfigError::StoryboardRange { min: 6, max: 4 }));
    }

    #[test]
    fn rejects_empty_canonical_prefix() {
        assert!(matches!(
            EngineConfig::parse_ron(r#"(canonical_prefix: "")"#),
            Err(ConfigError::EmptyCanonicalPrefix)
        ));
    }

    #[test]
    fn malformed_ron_is_an_error() {
        assert!(matches!(
            EngineConfig::parse_ron("(reference_limit: \"three\")"),
            Err(ConfigError::Ron(_))
        ));
    }
}
