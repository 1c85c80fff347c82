use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use serde::{Deserialize, Serialize};

use crate::version::{Constraint, VersionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("failed to parse requirement `{requirement}`: {reason}")]
    InvalidRequirement { requirement: String, reason: String },
    #[error("`{requirement}` is a URL requirement; declare it under the vcs source")]
    UrlInRegistry { requirement: String },
    #[error("unknown dependency source `{0}`")]
    UnknownSource(String),
    #[error("empty dependency")]
    Empty,
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Where a dependency comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pypi,
    Vcs,
}

impl Source {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pypi => "pypi",
            Self::Vcs => "vcs",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = DependencyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pypi" => Ok(Self::Pypi),
            "vcs" => Ok(Self::Vcs),
            other => Err(DependencyError::UnknownSource(other.to_string())),
        }
    }
}

/// Registry convention: case-insensitive, `-`, `_` and `.` are equivalent and
/// runs of them collapse.
#[must_use]
pub fn normalize_dist_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

#[derive(Debug, Clone)]
pub struct RegistryDependency {
    name: String,
    constraint: Constraint,
}

impl RegistryDependency {
    #[must_use]
    pub fn new(name: &str, constraint: Constraint) -> Self {
        Self {
            name: normalize_dist_name(name),
            constraint,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }
}

#[derive(Debug, Clone)]
pub struct UrlDependency {
    url: String,
}

impl UrlDependency {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A requested dependency. Identity is the normalized name or the exact
/// URL; the constraint is not part of it.
#[derive(Debug, Clone)]
pub enum Dependency {
    Registry(RegistryDependency),
    Url(UrlDependency),
}

impl Dependency {
    pub fn registry(name: &str, constraint: &str) -> Result<Self, DependencyError> {
        if normalize_dist_name(name).is_empty() {
            return Err(DependencyError::Empty);
        }
        Ok(Self::Registry(RegistryDependency::new(
            name,
            Constraint::from_str(constraint)?,
        )))
    }

    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(UrlDependency::new(url))
    }

    /// Build a descriptor from user text: a PEP 508 requirement for the
    /// registry, a verbatim URL for version control.
    pub fn parse(source: Source, text: &str) -> Result<Self, DependencyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DependencyError::Empty);
        }
        match source {
            Source::Vcs => Ok(Self::url(text)),
            Source::Pypi => parse_registry(text),
        }
    }

    #[must_use]
    pub fn source(&self) -> Source {
        match self {
            Self::Registry(_) => Source::Pypi,
            Self::Url(_) => Source::Vcs,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Registry(dep) => dep.name(),
            Self::Url(dep) => dep.url(),
        }
    }

    #[must_use]
    pub fn is_satisfied_by(&self, installed: &InstalledDependency) -> bool {
        match (self, installed) {
            (Self::Registry(requested), InstalledDependency::Registry { name, version }) => {
                requested.name == *name && requested.constraint.contains(version.as_deref())
            }
            (Self::Url(requested), InstalledDependency::Url { url }) => requested.url == *url,
            _ => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Url(_) => 0,
            Self::Registry(_) => 1,
        }
    }
}

fn parse_registry(text: &str) -> Result<Dependency, DependencyError> {
    let requirement =
        PepRequirement::from_str(text).map_err(|err| DependencyError::InvalidRequirement {
            requirement: text.to_string(),
            reason: err.to_string(),
        })?;
    let constraint = match requirement.version_or_url.as_ref() {
        Some(VersionOrUrl::VersionSpecifier(spec)) => Constraint::from_str(&spec.to_string())?,
        Some(VersionOrUrl::Url(_)) => {
            return Err(DependencyError::UrlInRegistry {
                requirement: text.to_string(),
            })
        }
        None => Constraint::any(),
    };
    Ok(Dependency::Registry(RegistryDependency::new(
        requirement.name.as_ref(),
        constraint,
    )))
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank() && self.identity() == other.identity()
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        self.identity().hash(state);
    }
}

impl PartialOrd for Dependency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dependency {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank(), self.identity()).cmp(&(other.rank(), other.identity()))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(dep) => write!(f, "{}{}", dep.name, dep.constraint),
            Self::Url(dep) => f.write_str(&dep.url),
        }
    }
}

/// What a built environment actually holds.
#[derive(Debug, Clone)]
pub enum InstalledDependency {
    Registry {
        name: String,
        version: Option<String>,
    },
    Url {
        url: String,
    },
}

impl InstalledDependency {
    #[must_use]
    pub fn registry(name: &str, version: Option<&str>) -> Self {
        Self::Registry {
            name: normalize_dist_name(name),
            version: version.map(ToOwned::to_owned),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Registry { name, .. } => name,
            Self::Url { url } => url,
        }
    }

    /// Installed version; URL entries have none.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Registry { version, .. } => version.as_deref(),
            Self::Url { .. } => None,
        }
    }

    #[must_use]
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry { .. })
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Url { .. } => 0,
            Self::Registry { .. } => 1,
        }
    }
}

impl PartialEq for InstalledDependency {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank() && self.identity() == other.identity()
    }
}

impl Eq for InstalledDependency {}

impl Hash for InstalledDependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        self.identity().hash(state);
    }
}

impl PartialOrd for InstalledDependency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstalledDependency {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank(), self.identity()).cmp(&(other.rank(), other.identity()))
    }
}

/// Requested dependencies grouped by source, deduplicated by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    by_source: BTreeMap<Source, Vec<Dependency>>,
}

impl Requirements {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dependency; a repeated registry name has its constraint
    /// merged into the existing entry.
    pub fn insert(&mut self, dependency: Dependency) {
        let entries = self.by_source.entry(dependency.source()).or_default();
        match entries.iter_mut().find(|existing| **existing == dependency) {
            Some(Dependency::Registry(existing)) => {
                if let Dependency::Registry(incoming) = &dependency {
                    existing.constraint = existing.constraint.merge(&incoming.constraint);
                }
            }
            Some(Dependency::Url(_)) => {}
            None => entries.push(dependency),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn get(&self, source: Source) -> &[Dependency] {
        self.by_source.get(&source).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Source, &[Dependency])> {
        self.by_source
            .iter()
            .map(|(source, deps)| (*source, deps.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }
}

impl FromIterator<Dependency> for Requirements {
    fn from_iter<T: IntoIterator<Item = Dependency>>(iter: T) -> Self {
        let mut requirements = Self::new();
        for dependency in iter {
            requirements.insert(dependency);
        }
        requirements
    }
}
