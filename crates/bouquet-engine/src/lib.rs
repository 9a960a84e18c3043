//! Bouquet Engine - rendering addon sources into YAML documents
//!
//! An addon's documents come either from a plain file bundle, emitted
//! unchanged, or from a MiniJinja template bundle rendered against the
//! coalesced values of an instance. Template bundles may nest further
//! bundles, which see only their own slice of the values plus `global`.

pub mod engine;
pub mod error;
pub mod filters;
pub mod source;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use source::{
    AddonInfo, FileBundle, InstanceInfo, RenderContext, RenderSource, RenderedFiles,
    TemplateBundle,
};
