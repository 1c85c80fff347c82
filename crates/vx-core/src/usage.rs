use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use vx_domain::EnvMetadata;

use crate::cache::{VenvCache, VenvQuery};
use crate::error::{CacheError, Result};
use crate::lock::{lock_path_for, ScopedLock};

pub const USAGE_FILENAME: &str = "usage_stats";

/// Tracks when each environment was last used so stale ones can be
/// destroyed. Lines are `<uuid> <RFC 3339 timestamp>`.
#[derive(Debug)]
pub struct UsageManager<'a> {
    path: PathBuf,
    lock_path: PathBuf,
    cache: &'a VenvCache,
}

impl<'a> UsageManager<'a> {
    /// Opens the usage log, seeding it from the index when it does not
    /// exist yet so already built environments start their retention clock
    /// now.
    pub fn new(path: impl Into<PathBuf>, cache: &'a VenvCache) -> Result<Self> {
        let path = path.into();
        let manager = Self {
            lock_path: lock_path_for(&path),
            path,
            cache,
        };
        manager.seed_if_missing()?;
        Ok(manager)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_usage(&self, metadata: &EnvMetadata) -> Result<()> {
        self.record_usage_at(metadata, OffsetDateTime::now_utc())
    }

    pub fn record_usage_at(&self, metadata: &EnvMetadata, at: OffsetDateTime) -> Result<()> {
        let line = format!("{} {}\n", metadata.uuid(), at.format(&Rfc3339)?);
        let _lock = self.lock()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| CacheError::io("open", &self.path, err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| CacheError::io("append to", &self.path, err))?;
        debug!(uuid = metadata.uuid(), "recorded venv usage");
        Ok(())
    }

    /// Most recent use per uuid.
    pub fn last_used(&self) -> Result<BTreeMap<String, OffsetDateTime>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(CacheError::io("read", &self.path, err)),
        };
        let mut last = BTreeMap::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((uuid, stamp)) = parse_usage_line(line) else {
                warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    "skipping unreadable usage entry"
                );
                continue;
            };
            last.entry(uuid)
                .and_modify(|seen: &mut OffsetDateTime| *seen = (*seen).max(stamp))
                .or_insert(stamp);
        }
        Ok(last)
    }

    pub fn clean_unused(&self, max_days: u32) -> Result<Vec<EnvMetadata>> {
        self.clean_unused_at(max_days, OffsetDateTime::now_utc())
    }

    /// Destroys every environment unused for more than `max_days` whole
    /// days before `now`, then compacts the log to one line per survivor.
    pub fn clean_unused_at(&self, max_days: u32, now: OffsetDateTime) -> Result<Vec<EnvMetadata>> {
        let _lock = self.lock()?;
        let mut usage = self.last_used()?;
        let stale: Vec<String> = usage
            .iter()
            .filter(|(_, used)| (now - **used).whole_days() > i64::from(max_days))
            .map(|(uuid, _)| uuid.clone())
            .collect();

        let mut destroyed = Vec::new();
        for uuid in stale {
            usage.remove(&uuid);
            // a uuid without an index entry was left behind by an earlier failure
            let Some(metadata) = self.cache.get_venv(&VenvQuery::uuid(uuid.as_str()))? else {
                debug!(%uuid, "usage entry has no indexed venv");
                continue;
            };
            info!(env_path = %metadata.env_path, "destroying unused venv");
            destroy_venv(self.cache, &metadata)?;
            destroyed.push(metadata);
        }
        self.rewrite(&usage)?;
        Ok(destroyed)
    }

    fn seed_if_missing(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let _lock = self.lock()?;
        if self.path.exists() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let usage: BTreeMap<String, OffsetDateTime> = self
            .cache
            .get_venvs_metadata()?
            .map(|metadata| (metadata.uuid().to_string(), now))
            .collect();
        debug!(entries = usage.len(), path = %self.path.display(), "seeding usage log");
        self.rewrite(&usage)
    }

    fn lock(&self) -> Result<ScopedLock> {
        ScopedLock::acquire(&self.lock_path, self.cache.lock_strategy())
    }

    fn rewrite(&self, usage: &BTreeMap<String, OffsetDateTime>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|err| CacheError::io("create", dir, err))?;
        let mut temp =
            NamedTempFile::new_in(dir).map_err(|err| CacheError::io("create temp file in", dir, err))?;
        for (uuid, used) in usage {
            let stamp = used.format(&Rfc3339)?;
            writeln!(temp, "{uuid} {stamp}").map_err(|err| CacheError::io("write", temp.path(), err))?;
        }
        temp.persist(&self.path)
            .map_err(|err| CacheError::io("replace", &self.path, err.error))?;
        Ok(())
    }
}

fn parse_usage_line(line: &str) -> Option<(String, OffsetDateTime)> {
    let (uuid, stamp) = line.split_once(char::is_whitespace)?;
    let stamp = OffsetDateTime::parse(stamp.trim(), &Rfc3339).ok()?;
    Some((uuid.to_string(), stamp))
}

/// Deletes the environment directory (already gone is fine) and drops its
/// index entry.
pub fn destroy_venv(cache: &VenvCache, metadata: &EnvMetadata) -> Result<()> {
    match fs::remove_dir_all(&metadata.env_path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(env_path = %metadata.env_path, "venv directory already gone");
        }
        Err(err) => return Err(CacheError::io("delete", &metadata.env_path, err)),
    }
    cache.remove(&metadata.env_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use vx_domain::{EnvOptions, Installed};

    use super::*;

    struct Fixture {
        temp: tempfile::TempDir,
        cache: VenvCache,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let cache = VenvCache::new(temp.path().join("venvs.idx"));
            Self { temp, cache }
        }

        fn build_env(&self, uuid: &str) -> EnvMetadata {
            let dir = self.temp.path().join("envs").join(uuid);
            fs::create_dir_all(dir.join("bin")).expect("env dir");
            let metadata = EnvMetadata::new(
                dir.display().to_string(),
                dir.join("bin").display().to_string(),
                true,
            );
            let mut installed = Installed::new();
            installed.insert_registry(uuid, "1.0");
            self.cache
                .store(installed, metadata.clone(), "py3.11", EnvOptions::new())
                .expect("store");
            metadata
        }

        fn usage_path(&self) -> PathBuf {
            self.temp.path().join(USAGE_FILENAME)
        }
    }

    #[test]
    fn new_log_is_seeded_from_index() {
        let fixture = Fixture::new();
        fixture.build_env("aaa");
        fixture.build_env("bbb");
        let manager = UsageManager::new(fixture.usage_path(), &fixture.cache).expect("manager");
        let usage = manager.last_used().expect("usage");
        assert_eq!(usage.keys().cloned().collect::<Vec<_>>(), vec!["aaa", "bbb"]);
    }

    #[test]
    fn last_use_wins_per_uuid() {
        let fixture = Fixture::new();
        let env = fixture.build_env("aaa");
        let manager = UsageManager::new(fixture.usage_path(), &fixture.cache).expect("manager");
        let later = OffsetDateTime::now_utc() + Duration::days(2);
        manager.record_usage_at(&env, later).expect("record");
        manager
            .record_usage_at(&env, later - Duration::days(5))
            .expect("record older");
        let usage = manager.last_used().expect("usage");
        assert_eq!(usage["aaa"].unix_timestamp(), later.unix_timestamp());
    }

    #[test]
    fn clean_destroys_only_stale_environments() {
        let fixture = Fixture::new();
        let old = fixture.build_env("old");
        let fresh = fixture.build_env("fresh");
        let manager = UsageManager::new(fixture.usage_path(), &fixture.cache).expect("manager");

        let now = OffsetDateTime::now_utc() + Duration::days(10);
        manager.record_usage_at(&fresh, now - Duration::days(1)).expect("fresh use");

        let destroyed = manager.clean_unused_at(5, now).expect("clean");
        assert_eq!(destroyed, vec![old.clone()]);
        assert!(!Path::new(&old.env_path).exists());
        assert!(Path::new(&fresh.env_path).exists());

        let remaining: Vec<String> = fixture
            .cache
            .get_venvs_metadata()
            .expect("metadata")
            .map(|m| m.env_path)
            .collect();
        assert_eq!(remaining, vec![fresh.env_path.clone()]);

        let contents = fs::read_to_string(fixture.usage_path()).expect("usage log");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("fresh "));
    }

    #[test]
    fn orphan_usage_entries_are_dropped_quietly() {
        let fixture = Fixture::new();
        fs::write(fixture.usage_path(), "ghost 2000-01-01T00:00:00Z\nnot a line\n").expect("seed");
        let manager = UsageManager::new(fixture.usage_path(), &fixture.cache).expect("manager");
        let destroyed = manager.clean_unused(1).expect("clean");
        assert!(destroyed.is_empty());
        let contents = fs::read_to_string(fixture.usage_path()).expect("usage log");
        assert!(contents.is_empty());
    }

    #[test]
    fn destroy_tolerates_missing_directory() {
        let fixture = Fixture::new();
        let env = fixture.build_env("gone");
        fs::remove_dir_all(&env.env_path).expect("pre-delete");
        destroy_venv(&fixture.cache, &env).expect("destroy");
        assert!(fixture.cache.records().expect("records").is_empty());
    }
}
