//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid version '{input}': {source}")]
    InvalidVersion {
        input: String,
        #[source]
        source: semver::Error,
    },

    #[error("Invalid version range '{input}': {message}")]
    InvalidRange { input: String, message: String },

    #[error("no matching manifest for {name} ({range})")]
    ManifestNotFound { name: String, range: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the error means "nothing matched" rather than "bad input"
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::ManifestNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
