//! Controller settings from an optional YAML file
//!
//! ```yaml
//! workers: 4
//! mapperRefresh: 2m
//! remoteMapperTtl: 30s
//! project: dev
//! ```
//!
//! Command line flags are applied on top, see [`crate::commands::run`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_MAPPER_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ControllerConfig {
    /// Kubeconfig of the garden cluster; inferred when unset
    pub kubeconfig: Option<PathBuf>,

    /// Workers per controller
    pub workers: usize,

    /// Interval between discovery runs for the local REST mapper
    #[serde(with = "humantime_serde")]
    pub mapper_refresh: Duration,

    /// How long a shoot's REST mapper is reused; zero disables caching
    #[serde(with = "humantime_serde")]
    pub remote_mapper_ttl: Duration,

    /// Gardener project whose namespace holds the seed credentials
    pub project: Option<String>,

    /// Fail rendering on undefined template variables
    pub strict_templates: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            workers: DEFAULT_WORKERS,
            mapper_refresh: DEFAULT_MAPPER_REFRESH,
            remote_mapper_ttl: Duration::ZERO,
            project: None,
            strict_templates: false,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|e| CliError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CliError::invalid_config_with_help(
                "workers must be at least 1",
                "set --workers or `workers` in the config file",
            ));
        }
        if self.mapper_refresh.is_zero() {
            return Err(CliError::invalid_config("mapper refresh interval must not be zero"));
        }
        if self.project.as_deref().is_some_and(str::is_empty) {
            return Err(CliError::invalid_config("project name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.mapper_refresh, Duration::from_secs(60));
        assert!(config.remote_mapper_ttl.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let config = ControllerConfig::from_yaml(
            r#"
workers: 4
mapperRefresh: 2m
remoteMapperTtl: 30s
project: dev
strictTemplates: true
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.mapper_refresh, Duration::from_secs(120));
        assert_eq!(config.remote_mapper_ttl, Duration::from_secs(30));
        assert_eq!(config.project.as_deref(), Some("dev"));
        assert!(config.strict_templates);
        assert!(config.kubeconfig.is_none());
    }

    #[test]
    fn test_partial_and_empty_files_use_defaults() {
        let config = ControllerConfig::from_yaml("project: dev\n").unwrap();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.mapper_refresh, DEFAULT_MAPPER_REFRESH);

        assert_eq!(ControllerConfig::from_yaml("").unwrap(), ControllerConfig::default());
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_durations() {
        assert!(ControllerConfig::from_yaml("wrokers: 3\n").is_err());
        assert!(ControllerConfig::from_yaml("mapperRefresh: soon\n").is_err());
    }

    #[test]
    fn test_validate() {
        let config = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        insta::assert_snapshot!(config.validate().unwrap_err().to_string(), @"Invalid configuration: workers must be at least 1");

        let config = ControllerConfig {
            mapper_refresh: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            project: Some(String::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ControllerConfig::load(Path::new("/nonexistent/bouquet.yaml")).unwrap_err();
        assert!(matches!(err, CliError::ConfigRead { .. }));
    }
}
