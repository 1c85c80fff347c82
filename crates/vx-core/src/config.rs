use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dirs_next::{data_dir, home_dir};

use crate::cache::{VenvCache, INDEX_FILENAME};
use crate::lock::LockStrategy;
use crate::usage::USAGE_FILENAME;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct Config {
    location: CacheLocation,
    lock_strategy: LockStrategy,
    retention_days: u32,
    write_delay: Option<Duration>,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unusable value or the cache
    /// directory cannot be resolved.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let lock_strategy = match snapshot.var("VX_LOCK_STRATEGY") {
            Some(raw) => raw
                .parse::<LockStrategy>()
                .map_err(|err| anyhow!("invalid VX_LOCK_STRATEGY: {err}"))?,
            None => LockStrategy::platform_default(),
        };
        let retention_days = match snapshot.var("VX_RETENTION_DAYS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid VX_RETENTION_DAYS `{raw}`"))?,
            None => DEFAULT_RETENTION_DAYS,
        };
        let write_delay = snapshot
            .var("VX_TEST_WRITE_DELAY_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_millis);
        Ok(Self {
            location: resolve_cache_location(snapshot)?,
            lock_strategy,
            retention_days,
            write_delay,
        })
    }

    #[must_use]
    pub fn location(&self) -> &CacheLocation {
        &self.location
    }

    #[must_use]
    pub fn lock_strategy(&self) -> LockStrategy {
        self.lock_strategy
    }

    #[must_use]
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.location.path.join(INDEX_FILENAME)
    }

    #[must_use]
    pub fn usage_path(&self) -> PathBuf {
        self.location.path.join(USAGE_FILENAME)
    }

    #[must_use]
    pub fn open_cache(&self) -> VenvCache {
        VenvCache::new(self.index_path())
            .with_lock_strategy(self.lock_strategy)
            .with_write_delay(self.write_delay)
    }
}

fn resolve_cache_location(snapshot: &EnvSnapshot) -> Result<CacheLocation> {
    if let Some(override_path) = snapshot.var("VX_CACHE_DIR") {
        return Ok(CacheLocation {
            path: absolutize(Path::new(override_path))?,
            source: "VX_CACHE_DIR",
        });
    }
    if let Some(base) = data_dir() {
        return Ok(CacheLocation {
            path: base.join("vx"),
            source: "data dir",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(CacheLocation {
            path: home.join(".local").join("share").join("vx"),
            source: "HOME/.local/share",
        });
    }
    Ok(CacheLocation {
        path: PathBuf::from("/tmp/vx"),
        source: "default (/tmp/vx)",
    })
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()
            .context("failed to resolve VX_CACHE_DIR")?
            .join(path))
    }
}
