use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};

/// Parse failures for version strings and constraint expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version constraint `{constraint}`: {reason}")]
    InvalidConstraint { constraint: String, reason: String },
    #[error("invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// A conjunction of PEP 440 clauses. The empty constraint accepts anything,
/// including "nothing installed".
#[derive(Debug, Clone)]
pub struct Constraint {
    specifiers: VersionSpecifiers,
}

impl Constraint {
    #[must_use]
    pub fn any() -> Self {
        Self {
            specifiers: VersionSpecifiers::from_iter(std::iter::empty()),
        }
    }

    #[must_use]
    pub fn is_any(&self) -> bool {
        self.specifiers.iter().next().is_none()
    }

    /// Whether an installed version string falls inside this constraint.
    /// Unparseable versions never do.
    #[must_use]
    pub fn contains(&self, installed: Option<&str>) -> bool {
        if self.is_any() {
            return true;
        }
        let Some(installed) = installed else {
            return false;
        };
        match parse_version(installed) {
            Ok(version) => self.specifiers.contains(&version),
            Err(_) => false,
        }
    }

    /// AND-combines two constraints, dropping clauses already present.
    #[must_use]
    pub fn merge(&self, other: &Constraint) -> Self {
        let mut clauses: Vec<VersionSpecifier> = self.specifiers.iter().cloned().collect();
        for clause in other.specifiers.iter() {
            let rendered = clause.to_string();
            if !clauses.iter().any(|existing| existing.to_string() == rendered) {
                clauses.push(clause.clone());
            }
        }
        Self {
            specifiers: VersionSpecifiers::from_iter(clauses),
        }
    }

    fn clauses(&self) -> Vec<String> {
        self.specifiers.iter().map(ToString::to_string).collect()
    }
}

impl Default for Constraint {
    fn default() -> Self {
        Self::any()
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.clauses() == other.clauses()
    }
}

impl Eq for Constraint {}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clauses().join(","))
    }
}

impl FromStr for Constraint {
    type Err = VersionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }
        let mut clauses = Vec::new();
        for clause in trimmed.split(',') {
            let compact: String = clause.split_whitespace().collect();
            if compact.is_empty() {
                return Err(VersionError::InvalidConstraint {
                    constraint: raw.to_string(),
                    reason: "empty clause".to_string(),
                });
            }
            if compact.starts_with(['=', '!', '<', '>', '~']) {
                clauses.push(compact);
            } else {
                // a bare version pins exactly
                clauses.push(format!("=={compact}"));
            }
        }
        let specifiers = VersionSpecifiers::from_str(&clauses.join(", ")).map_err(|err| {
            VersionError::InvalidConstraint {
                constraint: raw.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self { specifiers })
    }
}

pub fn parse_version(raw: &str) -> Result<Version, VersionError> {
    Version::from_str(raw.trim()).map_err(|err| VersionError::InvalidVersion {
        version: raw.to_string(),
        reason: err.to_string(),
    })
}

/// Decide whether `installed` satisfies `constraint`.
///
/// A missing or blank constraint means "don't care" and always holds. Any
/// malformed input yields `false`; use [`try_satisfies`] to see why.
#[must_use]
pub fn satisfies(installed: Option<&str>, constraint: Option<&str>) -> bool {
    try_satisfies(installed, constraint).unwrap_or(false)
}

pub fn try_satisfies(installed: Option<&str>, constraint: Option<&str>) -> Result<bool, VersionError> {
    let Some(raw) = constraint.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(true);
    };
    let constraint = Constraint::from_str(raw)?;
    let Some(installed) = installed else {
        return Ok(false);
    };
    let version = parse_version(installed)?;
    Ok(constraint.specifiers.contains(&version))
}

/// Total order over installed version strings. Unparseable versions sort
/// below every valid one and compare lexically among themselves.
#[must_use]
pub fn compare_versions(left: Option<&str>, right: Option<&str>) -> Ordering {
    let left_version = left.and_then(|raw| parse_version(raw).ok());
    let right_version = right.and_then(|raw| parse_version(raw).ok());
    match (left_version, right_version) {
        (Some(l), Some(r)) => l.cmp(&r),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => left.cmp(&right),
    }
}
