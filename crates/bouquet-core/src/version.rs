//! Semantic-version range expressions
//!
//! Grammar:
//! - alternatives are separated by `||`
//! - an alternative is a whitespace-separated list of comparators, all of
//!   which must hold
//! - a comparator is `OP VERSION` with `OP` one of `=`, `==`, `!=`, `>`,
//!   `>=`, `<`, `<=`, or a bare version meaning exact equality
//! - `*` matches every version
//!
//! Example: `>=1.0.0 <2.0.0 || >=3.0.0`
//!
//! Comparisons follow semver precedence, so build metadata is ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    /// Longest prefixes first so `>=` is not read as `>`
    const PREFIXES: [(&'static str, Op); 7] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ];

    fn split(token: &str) -> (Op, &str) {
        Self::PREFIXES
            .iter()
            .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, token))
    }

    fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, version: &Version) -> bool {
        self.op.accepts(precedence(version, &self.version))
    }
}

/// A parsed version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    /// Disjunction of conjunctions. An empty conjunction matches everything.
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// Range matching every version
    pub fn any() -> Self {
        Self {
            alternatives: vec![Vec::new()],
        }
    }

    /// Range matching exactly one version
    pub fn exact(version: &Version) -> Self {
        Self {
            alternatives: vec![vec![Comparator {
                op: Op::Eq,
                version: version.clone(),
            }]],
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |message: String| CoreError::InvalidRange {
            input: input.to_string(),
            message,
        };

        if input.trim().is_empty() {
            return Err(invalid("empty range".to_string()));
        }

        let mut alternatives = Vec::new();
        for part in input.split("||") {
            let mut comparators = Vec::new();
            let mut wildcard = false;
            let mut tokens = part.split_whitespace();

            while let Some(token) = tokens.next() {
                if token == "*" {
                    wildcard = true;
                    continue;
                }
                let (op, rest) = Op::split(token);
                // Allow whitespace between operator and version: `>= 1.0.0`
                let raw = if rest.is_empty() {
                    tokens
                        .next()
                        .ok_or_else(|| invalid(format!("operator '{}' without version", token)))?
                } else {
                    rest
                };

                let version = Version::parse(raw)
                    .map_err(|e| invalid(format!("'{}': {}", raw, e)))?;
                comparators.push(Comparator { op, version });
            }

            if comparators.is_empty() && !wildcard {
                return Err(invalid("empty alternative".to_string()));
            }
            alternatives.push(comparators);
        }

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }
}

impl FromStr for VersionRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alternatives.iter().any(Vec::is_empty) {
            return f.write_str("*");
        }
        let rendered: Vec<String> = self
            .alternatives
            .iter()
            .map(|all| {
                all.iter()
                    .map(|c| format!("{}{}", c.op.as_str(), c.version))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        f.write_str(&rendered.join(" || "))
    }
}

/// Semver precedence: build metadata does not take part
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_conjunction() {
        let range = VersionRange::parse(">=1.0.0 <2.0.0").unwrap();
        assert!(range.matches(&v("1.0.0")));
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("0.9.0")));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let range = VersionRange::parse("1.2.0").unwrap();
        assert!(range.matches(&v("1.2.0")));
        assert!(!range.matches(&v("1.2.1")));
        assert!(!range.matches(&v("1.3.0")));
    }

    #[test]
    fn test_alternatives() {
        let range = VersionRange::parse("<1.0.0 || >=3.0.0 !=3.1.0").unwrap();
        assert!(range.matches(&v("0.5.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(range.matches(&v("3.0.0")));
        assert!(!range.matches(&v("3.1.0")));
        assert!(range.matches(&v("3.2.0")));
    }

    #[test]
    fn test_operator_separated_by_whitespace() {
        let range = VersionRange::parse(">= 1.0.0  < 1.5.0").unwrap();
        assert!(range.matches(&v("1.4.0")));
        assert!(!range.matches(&v("1.5.0")));
    }

    #[test]
    fn test_all_operators() {
        let base = v("1.0.0");
        assert!(VersionRange::parse("=1.0.0").unwrap().matches(&base));
        assert!(VersionRange::parse("==1.0.0").unwrap().matches(&base));
        assert!(!VersionRange::parse("!=1.0.0").unwrap().matches(&base));
        assert!(!VersionRange::parse(">1.0.0").unwrap().matches(&base));
        assert!(VersionRange::parse(">=1.0.0").unwrap().matches(&base));
        assert!(!VersionRange::parse("<1.0.0").unwrap().matches(&base));
        assert!(VersionRange::parse("<=1.0.0").unwrap().matches(&base));
    }

    #[test]
    fn test_prerelease_precedence() {
        let range = VersionRange::parse("<1.0.0").unwrap();
        assert!(range.matches(&v("1.0.0-rc.1")));
        assert!(VersionRange::parse("=1.0.0").unwrap().matches(&v("1.0.0+build.5")));
    }

    #[test]
    fn test_any() {
        let range = VersionRange::any();
        assert!(range.matches(&v("0.0.1")));
        assert!(range.matches(&v("99.0.0-alpha")));
        assert_eq!(range.to_string(), "*");
        assert_eq!(VersionRange::parse(&range.to_string()).unwrap(), range);
    }

    #[test]
    fn test_wildcard() {
        let range = VersionRange::parse(" * ").unwrap();
        assert!(range.matches(&v("3.1.4")));
        assert_eq!(range.to_string(), "*");

        // next to comparators it adds nothing
        let range = VersionRange::parse("* >=2.0.0").unwrap();
        assert!(!range.matches(&v("1.9.0")));
        assert!(range.matches(&v("2.0.0")));
        assert!(VersionRange::parse("<1.0.0 || *").unwrap().matches(&v("5.0.0")));
    }

    #[test]
    fn test_invalid_ranges() {
        for input in ["", "   ", "latest", ">=", "1.0", ">=1.0.0 ||", "~1.0.0"] {
            let err = VersionRange::parse(input).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidRange { .. }),
                "expected InvalidRange for {input:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_display() {
        let range: VersionRange = ">= 1.0.0 <2.0.0||1.5.0".parse().unwrap();
        assert_eq!(range.to_string(), ">=1.0.0 <2.0.0 || =1.5.0");
        assert_eq!(VersionRange::exact(&v("1.2.3")).to_string(), "=1.2.3");
    }
}
