//! The environment index: one JSON record per line, appended when an
//! environment is built and compacted when one is destroyed.
//!
//! Reads take no lock. Writers hold the sibling `<index>.lock` for their
//! whole read-modify-write cycle; appends write one complete line and
//! removals replace the file through an atomic rename, so a lock-free
//! reader sees either the old or the new contents.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use vx_domain::{
    find_by_requirements, find_by_uuid, EnvMetadata, EnvOptions, EnvRecord, Installed,
    Requirements,
};

use crate::error::{CacheError, Result};
use crate::lock::{lock_path_for, LockStrategy, ScopedLock};

pub const INDEX_FILENAME: &str = "venvs.idx";

/// How a caller identifies the environment it wants.
#[derive(Debug, Clone)]
pub enum VenvQuery {
    ByUuid(String),
    ByRequirements {
        requirements: Requirements,
        interpreter: String,
        options: EnvOptions,
    },
}

impl VenvQuery {
    #[must_use]
    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self::ByUuid(uuid.into())
    }

    #[must_use]
    pub fn requirements(
        requirements: Requirements,
        interpreter: impl Into<String>,
        options: EnvOptions,
    ) -> Self {
        Self::ByRequirements {
            requirements,
            interpreter: interpreter.into(),
            options,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenvCache {
    path: PathBuf,
    lock_path: PathBuf,
    lock_strategy: LockStrategy,
    write_delay: Option<Duration>,
}

impl VenvCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            lock_path: lock_path_for(&path),
            path,
            lock_strategy: LockStrategy::platform_default(),
            write_delay: None,
        }
    }

    #[must_use]
    pub fn with_lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    /// Sleeps while holding the lock, between reading and writing. Only
    /// useful to force overlapping writers in tests.
    #[doc(hidden)]
    #[must_use]
    pub fn with_write_delay(mut self, delay: Option<Duration>) -> Self {
        self.write_delay = delay;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_strategy(&self) -> LockStrategy {
        self.lock_strategy
    }

    /// Every readable record, in index order.
    pub fn records(&self) -> Result<Vec<EnvRecord>> {
        Ok(self
            .read_lines()?
            .iter()
            .enumerate()
            .filter_map(|(index, line)| self.parse_line(index, line))
            .collect())
    }

    pub fn get_record(&self, query: &VenvQuery) -> Result<Option<EnvRecord>> {
        let records = self.records()?;
        let found = match query {
            VenvQuery::ByUuid(uuid) => find_by_uuid(&records, uuid),
            VenvQuery::ByRequirements {
                requirements,
                interpreter,
                options,
            } => find_by_requirements(&records, requirements, interpreter, options),
        };
        match found {
            Some(record) => debug!(env_path = %record.metadata.env_path, "venv index hit"),
            None => debug!(records = records.len(), "venv index miss"),
        }
        Ok(found.cloned())
    }

    pub fn get_venv(&self, query: &VenvQuery) -> Result<Option<EnvMetadata>> {
        Ok(self.get_record(query)?.map(|record| record.metadata))
    }

    /// Like [`VenvCache::get_venv`], but an entry whose directory vanished is
    /// dropped from the index and reported as a miss.
    pub fn get_live_venv(&self, query: &VenvQuery) -> Result<Option<EnvMetadata>> {
        let Some(metadata) = self.get_venv(query)? else {
            return Ok(None);
        };
        if Path::new(&metadata.env_path).is_dir() {
            return Ok(Some(metadata));
        }
        warn!(
            env_path = %metadata.env_path,
            "environment directory is missing; it will be rebuilt"
        );
        self.remove(&metadata.env_path)?;
        Ok(None)
    }

    /// Metadata of every indexed environment, parsed lazily.
    pub fn get_venvs_metadata(&self) -> Result<impl Iterator<Item = EnvMetadata> + '_> {
        let lines = self.read_lines()?;
        Ok(lines
            .into_iter()
            .enumerate()
            .filter_map(move |(index, line)| self.parse_line(index, &line))
            .map(|record| record.metadata))
    }

    /// Appends a record for a freshly built environment.
    pub fn store(
        &self,
        installed: Installed,
        metadata: EnvMetadata,
        interpreter: &str,
        options: EnvOptions,
    ) -> Result<EnvRecord> {
        let record = EnvRecord {
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            installed,
            metadata,
            interpreter: interpreter.to_string(),
            options,
        };
        let mut line = record.to_line()?;
        line.push('\n');

        let _lock = self.lock()?;
        let duplicate = self
            .records()?
            .iter()
            .any(|existing| existing.metadata.env_path == record.metadata.env_path);
        if duplicate {
            return Err(CacheError::DuplicateEnv {
                env_path: record.metadata.env_path,
            });
        }
        self.pause();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| CacheError::io("open", &self.path, err))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|err| CacheError::io("append to", &self.path, err))?;
        info!(env_path = %record.metadata.env_path, "stored venv in index");
        Ok(record)
    }

    /// Drops every record for `env_path` and returns how many went away.
    /// Removing an unknown path is a no-op.
    pub fn remove(&self, env_path: &str) -> Result<usize> {
        let _lock = self.lock()?;
        let lines = self.read_lines()?;
        let before = lines.len();
        let kept: Vec<Vec<u8>> = lines
            .into_iter()
            .filter(|line| match decode_line(line) {
                Some(record) => record.metadata.env_path != env_path,
                // unreadable lines are not ours to drop
                None => true,
            })
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            debug!(env_path, "nothing to remove from venv index");
            return Ok(0);
        }
        self.pause();
        self.rewrite(&kept)?;
        info!(env_path, removed, "removed venv from index");
        Ok(removed)
    }

    fn lock(&self) -> Result<ScopedLock> {
        ScopedLock::acquire(&self.lock_path, self.lock_strategy)
    }

    fn pause(&self) {
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
    }

    /// Raw, trimmed, non-empty lines. Bytes rather than text so a line with
    /// invalid UTF-8 is skipped on its own instead of failing the read.
    fn read_lines(&self) -> Result<Vec<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(contents
                .split(|byte| *byte == b'\n')
                .map(<[u8]>::trim_ascii)
                .filter(|line| !line.is_empty())
                .map(<[u8]>::to_vec)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "venv index not found, starting empty");
                Ok(Vec::new())
            }
            Err(err) => Err(CacheError::io("read", &self.path, err)),
        }
    }

    fn parse_line(&self, index: usize, line: &[u8]) -> Option<EnvRecord> {
        let parsed = std::str::from_utf8(line)
            .map_err(|err| err.to_string())
            .and_then(|text| EnvRecord::from_line(text).map_err(|err| err.to_string()));
        match parsed {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    %err,
                    "skipping unreadable venv index entry"
                );
                None
            }
        }
    }

    fn rewrite(&self, lines: &[Vec<u8>]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp =
            NamedTempFile::new_in(dir).map_err(|err| CacheError::io("create temp file in", dir, err))?;
        for line in lines {
            temp.write_all(line)
                .and_then(|()| temp.write_all(b"\n"))
                .map_err(|err| CacheError::io("write", temp.path(), err))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|err| CacheError::io("sync", temp.path(), err))?;
        temp.persist(&self.path)
            .map_err(|err| CacheError::io("replace", &self.path, err.error))?;
        Ok(())
    }
}

fn decode_line(line: &[u8]) -> Option<EnvRecord> {
    let text = std::str::from_utf8(line).ok()?;
    EnvRecord::from_line(text).ok()
}

#[cfg(test)]
mod tests;
