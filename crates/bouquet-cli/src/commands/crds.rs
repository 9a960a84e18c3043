//! Crds command - print the CustomResourceDefinitions

use bouquet_core::{AddonInstance, AddonManifest};
use kube::CustomResourceExt;

use crate::error::Result;

pub fn run() -> Result<()> {
    print!("{}", render()?);
    Ok(())
}

/// Multi-document YAML of every CRD the controllers watch
pub fn render() -> Result<String> {
    let crds = [AddonManifest::crd(), AddonInstance::crd()];
    let documents = crds
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}
