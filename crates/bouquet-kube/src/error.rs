//! Error types for bouquet-kube

use bouquet_core::AggregateError;
use kube::core::ErrorResponse;
use thiserror::Error;

/// Result type for bouquet-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to a cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Shoot has not been scheduled onto a seed yet
    #[error("shoot {namespace}/{name} is not yet associated to a seed")]
    NoSeed { namespace: String, name: String },

    /// Credentials secret lacks the kubeconfig key
    #[error("secret {namespace}/{name} has no '{key}' entry")]
    NoKubeconfig {
        namespace: String,
        name: String,
        key: &'static str,
    },

    /// Kubeconfig present but unusable
    #[error("invalid kubeconfig in secret {namespace}/{name}: {message}")]
    InvalidKubeconfig {
        namespace: String,
        name: String,
        message: String,
    },

    /// Kind not served by the target cluster
    #[error("unknown resource type: {api_version}/{kind}")]
    UnknownKind { api_version: String, kind: String },

    /// Document decoded but is not a usable object
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Rendered file is not valid YAML
    #[error("failed to decode {file}: {source}")]
    Decode {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Operation on one rendered object failed
    #[error("{object}: {source}")]
    Object {
        object: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Several object operations failed
    #[error("{0}")]
    Aggregate(#[from] AggregateError<KubeError>),
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a Kubernetes 409 AlreadyExists error
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            KubeError::Api(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists"
        )
    }

    /// API error as the server would report a missing object
    pub fn not_found(kind: &str, name: &str) -> Self {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} \"{}\" not found", kind, name),
            reason: "NotFound".to_string(),
            code: 404,
        }))
    }

    /// API error as the server would report a create of an existing object
    pub fn already_exists(kind: &str, name: &str) -> Self {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} \"{}\" already exists", kind, name),
            reason: "AlreadyExists".to_string(),
            code: 409,
        }))
    }
}
