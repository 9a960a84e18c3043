//! Template filters available to addon bundles

use base64::Engine as _;
use bouquet_core::VersionRange;
use minijinja::{Error, ErrorKind, Value};
use semver::Version;
use sha2::{Digest, Sha256};

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.to_string())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(invalid)
}

/// Usage: `{{ values.resources | toyaml | nindent(4) }}`
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(invalid)?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Usage: `{{ values.config | tojson }}`
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(invalid)
}

pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

pub fn b64decode(value: String) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

/// Usage: `{{ values.password | quote }}`
pub fn quote(value: Value) -> String {
    let raw = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Indent every non-empty line by `spaces`
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Like `indent`, with a leading newline
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Fail rendering when a value is missing or an empty string
///
/// Usage: `{{ values.domain | required("values.domain must be set") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none() || value.as_str() == Some("");
    if missing {
        return Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ));
    }
    Ok(value)
}

pub fn sha256sum(value: String) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Cut a string to at most `length` characters
///
/// Usage: `{{ instance.name | trunc(63) }}`
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

/// Test a version string against a range expression
///
/// Usage: `{% if addon.version | version_matches(">=2.0.0") %}`
pub fn version_matches(version: String, range: String) -> Result<bool, Error> {
    let version = Version::parse(version.trim_start_matches('v')).map_err(invalid)?;
    let range = VersionRange::parse(&range).map_err(invalid)?;
    Ok(range.matches(&version))
}
