//! Creating and deleting rendered objects on a target cluster
//!
//! Both directions are idempotent: an object that already exists counts as
//! created, one that is already gone counts as deleted. Every object is
//! attempted; failures are collected and returned together.

use bouquet_core::AggregateError;
use kube::api::DynamicObject;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::error::{KubeError, Result};
use crate::mapper::{Mapping, RestMapper};
use crate::objects::{describe, gvk_of};

/// Namespace given to namespaced objects that declare none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Outcome of a successful pass over a set of objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSummary {
    /// Objects created or deleted by this pass
    pub changed: Vec<String>,
    /// Objects already in the desired state
    pub unchanged: Vec<String>,
}

impl OperationSummary {
    pub fn total(&self) -> usize {
        self.changed.len() + self.unchanged.len()
    }
}

/// Mapping for an object, with its namespace filled in when required
fn prepare(mapper: &RestMapper, object: &DynamicObject) -> Result<(Mapping, DynamicObject)> {
    let gvk = gvk_of(object)?;
    let mapping = mapper.mapping_for(&gvk)?.clone();
    let mut object = object.clone();

    if mapping.namespaced {
        if object.metadata.namespace.as_deref().is_none_or(str::is_empty) {
            object.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
        }
    } else {
        object.metadata.namespace = None;
    }

    if object.metadata.name.as_deref().is_none_or(str::is_empty) {
        return Err(KubeError::InvalidObject(format!(
            "{} has no metadata.name",
            describe(&object)
        )));
    }
    Ok((mapping, object))
}

fn wrap(object: &str, error: KubeError) -> KubeError {
    KubeError::Object {
        object: object.to_string(),
        source: Box::new(error),
    }
}

/// Create every object in the given order
pub async fn create_objects<C>(
    cluster: &C,
    mapper: &RestMapper,
    objects: &[DynamicObject],
) -> Result<OperationSummary>
where
    C: ClusterApi + ?Sized,
{
    let mut summary = OperationSummary::default();
    let mut errors = Vec::new();

    for object in objects {
        let label = describe(object);
        let (mapping, object) = match prepare(mapper, object) {
            Ok(prepared) => prepared,
            Err(e) => {
                errors.push(wrap(&label, e));
                continue;
            }
        };
        let label = describe(&object);

        match cluster.create_object(&mapping, &object).await {
            Ok(()) => {
                debug!(object = %label, "created");
                summary.changed.push(label);
            }
            Err(e) if e.is_already_exists() => {
                debug!(object = %label, "already exists");
                summary.unchanged.push(label);
            }
            Err(e) => errors.push(wrap(&label, e)),
        }
    }

    AggregateError::check(errors)?;
    info!(
        created = summary.changed.len(),
        existing = summary.unchanged.len(),
        "objects applied"
    );
    Ok(summary)
}

/// Delete every object in the given order
pub async fn delete_objects<C>(
    cluster: &C,
    mapper: &RestMapper,
    objects: &[DynamicObject],
) -> Result<OperationSummary>
where
    C: ClusterApi + ?Sized,
{
    let mut summary = OperationSummary::default();
    let mut errors = Vec::new();

    for object in objects {
        let label = describe(object);
        let (mapping, object) = match prepare(mapper, object) {
            Ok(prepared) => prepared,
            Err(e) => {
                errors.push(wrap(&label, e));
                continue;
            }
        };
        let label = describe(&object);
        let name = object.metadata.name.as_deref().unwrap_or_default();

        match cluster
            .delete_object(&mapping, object.metadata.namespace.as_deref(), name)
            .await
        {
            Ok(()) => {
                debug!(object = %label, "deleted");
                summary.changed.push(label);
            }
            Err(e) if e.is_not_found() => {
                debug!(object = %label, "already gone");
                summary.unchanged.push(label);
            }
            Err(e) => errors.push(wrap(&label, e)),
        }
    }

    AggregateError::check(errors)?;
    info!(
        deleted = summary.changed.len(),
        missing = summary.unchanged.len(),
        "objects deleted"
    );
    Ok(summary)
}
