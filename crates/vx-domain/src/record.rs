use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dependency::{normalize_dist_name, InstalledDependency, Source};

/// Where a built environment lives and how it was provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvMetadata {
    pub env_path: String,
    #[serde(default)]
    pub env_bin_path: String,
    #[serde(default)]
    pub pip_installed: bool,
    /// Keys written by other tooling, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EnvMetadata {
    #[must_use]
    pub fn new(env_path: impl Into<String>, env_bin_path: impl Into<String>, pip_installed: bool) -> Self {
        Self {
            env_path: env_path.into(),
            env_bin_path: env_bin_path.into(),
            pip_installed,
            extra: BTreeMap::new(),
        }
    }

    /// The trailing segment of `env_path`, used as an alternate key.
    #[must_use]
    pub fn uuid(&self) -> &str {
        Path::new(&self.env_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

/// What was installed into an environment, per source: identity to
/// installed version (URL entries carry no version).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Installed(BTreeMap<Source, BTreeMap<String, Option<String>>>);

impl Installed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_registry(&mut self, name: &str, version: impl Into<String>) {
        self.0
            .entry(Source::Pypi)
            .or_default()
            .insert(normalize_dist_name(name), Some(version.into()));
    }

    pub fn insert_url(&mut self, url: impl Into<String>) {
        self.0.entry(Source::Vcs).or_default().insert(url.into(), None);
    }

    /// True when nothing at all was installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Rebuilds descriptors for one source; `None` when the source was
    /// never installed into.
    #[must_use]
    pub fn dependencies(&self, source: Source) -> Option<BTreeSet<InstalledDependency>> {
        let entries = self.0.get(&source)?;
        Some(
            entries
                .iter()
                .map(|(identity, version)| match source {
                    Source::Pypi => InstalledDependency::registry(identity, version.as_deref()),
                    Source::Vcs => InstalledDependency::Url {
                        url: identity.clone(),
                    },
                })
                .collect(),
        )
    }
}

/// Build options that must match exactly between request and record.
/// Groups map to flag sets, so ordering never matters and empty groups
/// are equivalent to absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct EnvOptions(BTreeMap<String, BTreeSet<String>>);

impl EnvOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: impl Into<String>, flag: impl Into<String>) {
        self.0.entry(group.into()).or_default().insert(flag.into());
    }

    #[must_use]
    pub fn with(mut self, group: impl Into<String>, flag: impl Into<String>) -> Self {
        self.insert(group, flag);
        self
    }
}

impl From<BTreeMap<String, Vec<String>>> for EnvOptions {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        Self(
            raw.into_iter()
                .filter(|(_, flags)| !flags.is_empty())
                .map(|(group, flags)| (group, flags.into_iter().collect()))
                .collect(),
        )
    }
}

impl From<EnvOptions> for BTreeMap<String, Vec<String>> {
    fn from(options: EnvOptions) -> Self {
        options
            .0
            .into_iter()
            .map(|(group, flags)| (group, flags.into_iter().collect()))
            .collect()
    }
}

/// One persisted line of the environment index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRecord {
    pub timestamp: i64,
    #[serde(default)]
    pub installed: Installed,
    pub metadata: EnvMetadata,
    #[serde(default)]
    pub interpreter: String,
    #[serde(default)]
    pub options: EnvOptions,
}

impl EnvRecord {
    #[must_use]
    pub fn uuid(&self) -> &str {
        self.metadata.uuid()
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
