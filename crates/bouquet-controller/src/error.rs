//! Error types for bouquet-controller

use bouquet_core::{AggregateError, CoreError};
use bouquet_engine::EngineError;
use bouquet_kube::KubeError;
use thiserror::Error;

/// Result type for reconciliation
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors a sync can fail with; all of them are retried by the runtime
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Kube(#[from] KubeError),

    /// Manifest names neither a plain nor a template ConfigMap
    #[error("manifest {namespace}/{name} has no configMap or configMapTemplate")]
    NoSource { namespace: String, name: String },

    /// Addon annotation is not a JSON array of strings
    #[error("invalid addon annotation on shoot {shoot}: {source}")]
    Parse {
        shoot: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("shoot {shoot} requests addons more than once: {}", .addons.join(", "))]
    DuplicateAddons { shoot: String, addons: Vec<String> },

    #[error("{controller}: caches did not sync before shutdown")]
    CacheSyncFailed { controller: String },

    #[error("sync panicked: {0}")]
    Panicked(String),

    /// Several independent steps failed
    #[error("{0}")]
    Aggregate(#[from] AggregateError<ControllerError>),
}

impl ControllerError {
    /// A looked-up object or manifest does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ControllerError::Kube(e) => e.is_not_found(),
            ControllerError::Core(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ControllerError::Kube(e) if e.is_already_exists())
    }
}
