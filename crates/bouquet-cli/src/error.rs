//! CLI error types
//!
//! Everything that can stop the binary ends up here so `main` can render it
//! as a miette diagnostic.

use std::path::PathBuf;

use bouquet_controller::ControllerError;
use bouquet_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Failed to read config file {}", .path.display())]
    #[diagnostic(code(bouquet::cli::config_read))]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {message}", .path.display())]
    #[diagnostic(
        code(bouquet::cli::config_parse),
        help("durations use humantime syntax, e.g. `90s` or `5m`")
    )]
    ConfigParse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(bouquet::cli::invalid_config))]
    InvalidConfig {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to reach the local cluster: {error}")]
    #[diagnostic(
        code(bouquet::cli::connect),
        help("pass --kubeconfig or run inside the cluster with a service account")
    )]
    Connect { error: KubeError },

    #[error("{controller} controller failed: {error}")]
    #[diagnostic(code(bouquet::cli::controller))]
    Controller {
        controller: &'static str,
        error: ControllerError,
    },

    #[error("Failed to install signal handler")]
    #[diagnostic(code(bouquet::cli::signal))]
    Signal(#[source] std::io::Error),

    #[error("Failed to serialize CRDs: {0}")]
    #[diagnostic(code(bouquet::cli::serialize))]
    Serialize(#[from] serde_yaml::Error),
}

impl CliError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            help: None,
        }
    }

    pub fn invalid_config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
