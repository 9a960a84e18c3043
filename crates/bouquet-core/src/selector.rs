//! Manifest selection
//!
//! Given a set of manifests, a base name and a version range, pick the
//! manifest with the greatest version satisfying the range.

use std::borrow::Borrow;

use semver::Version;

use crate::error::{CoreError, Result};
use crate::types::{AddonManifest, ManifestRef};
use crate::version::VersionRange;

/// Select the highest-versioned manifest named `name` that satisfies `range`
///
/// Manifests whose name carries no parseable version never match. Among
/// several matches the strictly greatest version wins.
pub fn select<'a, M>(manifests: &'a [M], name: &str, range: &VersionRange) -> Result<&'a M>
where
    M: Borrow<AddonManifest>,
{
    best_match(manifests.iter(), name, range)
}

/// Resolve a [`ManifestRef`]: restrict to its namespace, then select
pub fn find_by_ref<'a, M>(manifests: &'a [M], reference: &ManifestRef) -> Result<&'a M>
where
    M: Borrow<AddonManifest>,
{
    let range = VersionRange::parse(&reference.version)?;
    let in_namespace = manifests.iter().filter(|m| {
        Borrow::<AddonManifest>::borrow(*m).metadata.namespace.as_deref() == Some(reference.namespace.as_str())
    });

    best_match(in_namespace, &reference.name, &range)
}

fn best_match<'a, M>(
    candidates: impl Iterator<Item = &'a M>,
    name: &str,
    range: &VersionRange,
) -> Result<&'a M>
where
    M: Borrow<AddonManifest> + 'a,
{
    let mut best: Option<(&'a M, Version)> = None;

    for candidate in candidates {
        let Some((base, version)) = candidate.borrow().name_and_version() else {
            continue;
        };
        if base != name || !range.matches(&version) {
            continue;
        }
        if best.as_ref().is_none_or(|(_, current)| version > *current) {
            best = Some((candidate, version));
        }
    }

    best.map(|(manifest, _)| manifest)
        .ok_or_else(|| CoreError::ManifestNotFound {
            name: name.to_string(),
            range: range.to_string(),
        })
}
