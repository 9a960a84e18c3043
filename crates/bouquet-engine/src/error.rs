//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error in {}: {}", .0.name, .0.message)]
    Template(#[from] TemplateError),

    #[error("Failed to convert values: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a MiniJinja failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl From<minijinja::ErrorKind> for TemplateErrorKind {
    fn from(kind: minijinja::ErrorKind) -> Self {
        use minijinja::ErrorKind as K;
        match kind {
            K::UndefinedError => Self::UndefinedVariable,
            K::UnknownFilter => Self::UnknownFilter,
            K::UnknownFunction => Self::UnknownFunction,
            K::SyntaxError => Self::SyntaxError,
            K::NonPrimitive | K::NonKey => Self::TypeError,
            K::InvalidOperation => Self::InvalidOperation,
            _ => Self::Other,
        }
    }
}

/// Template failure with the offending source attached
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(bouquet::template::render))]
pub struct TemplateError {
    /// Bundle key of the failing template
    pub name: String,

    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    pub fn from_minijinja(err: minijinja::Error, name: &str, source: &str) -> Self {
        let kind = TemplateErrorKind::from(err.kind());
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };
        let span = err.line().and_then(|line| line_span(source, line));

        Self {
            name: name.to_string(),
            message,
            kind,
            src: NamedSource::new(name, source.to_string()),
            span,
        }
    }
}

/// Byte span covering line `line` (1-based)
fn line_span(source: &str, line: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (index, text) in source.split('\n').enumerate() {
        if index + 1 == line {
            return Some(SourceSpan::new(offset.into(), text.len()));
        }
        offset += text.len() + 1;
    }
    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
