//! Bouquet Core - Core types for the addon controller
//!
//! This crate provides the foundational types used throughout Bouquet:
//! - `AddonManifest` / `AddonInstance`: the custom resources driving reconciliation
//! - `Shoot` / `Seed`: the subset of the Gardener cluster resources Bouquet consumes
//! - `Values`: parameter values with deep merge and scope coalescing
//! - `VersionRange`: semantic-version range expressions
//! - `selector`: picking the best manifest for a (name, range) query
//! - `AggregateError`: many failures reported as one

pub mod aggregate;
pub mod error;
pub mod garden;
pub mod selector;
pub mod types;
pub mod values;
pub mod version;

pub use aggregate::AggregateError;
pub use error::{CoreError, Result};
pub use garden::{SecretRef, Seed, SeedSpec, Shoot, ShootSpec, ShootStatus};
pub use selector::{find_by_ref, select};
pub use types::{
    ADDON_ANNOTATION, AddonInstance, AddonInstanceSpec, AddonInstanceStatus, AddonManifest,
    AddonManifestSpec, FINALIZER, ManifestRef, Target, parse_versioned_name,
};
pub use values::{GLOBAL_KEY, Values};
pub use version::VersionRange;
