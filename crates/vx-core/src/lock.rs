use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// How mutual exclusion between processes is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// OS advisory lock on the lock file; released by the OS if the holder
    /// dies.
    Advisory,
    /// The lock file's existence is the mutex. A holder that crashes leaves
    /// the file behind and every later acquirer waits forever.
    ExclusiveCreate,
}

impl LockStrategy {
    #[must_use]
    pub fn platform_default() -> Self {
        if cfg!(any(unix, windows)) {
            Self::Advisory
        } else {
            Self::ExclusiveCreate
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::ExclusiveCreate => "exclusive-create",
        }
    }
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockStrategy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "advisory" | "flock" => Ok(Self::Advisory),
            "exclusive-create" | "create" => Ok(Self::ExclusiveCreate),
            other => Err(format!("unknown lock strategy `{other}`")),
        }
    }
}

/// Sibling lock path: `<file>.lock`.
#[must_use]
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("vx"));
    name.push(".lock");
    path.with_file_name(name)
}

#[derive(Debug)]
enum Held {
    Advisory(File),
    Marker,
}

/// Exclusive inter-process lock held until dropped.
#[derive(Debug)]
pub struct ScopedLock {
    path: PathBuf,
    held: Held,
}

impl ScopedLock {
    /// Blocks until the lock is ours. There is no timeout; contention is
    /// retried with capped exponential backoff.
    pub fn acquire(path: &Path, strategy: LockStrategy) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| CacheError::io("create lock directory", parent, err))?;
        }
        let held = match strategy {
            LockStrategy::Advisory => Held::Advisory(acquire_advisory(path)?),
            LockStrategy::ExclusiveCreate => {
                acquire_marker(path)?;
                Held::Marker
            }
        };
        debug!(path = %path.display(), %strategy, "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            held,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        match &self.held {
            Held::Advisory(file) => {
                if let Err(err) = file.unlock() {
                    warn!(path = %self.path.display(), %err, "failed to release lock");
                }
            }
            Held::Marker => match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %self.path.display(), %err, "failed to remove lock file"),
            },
        }
        debug!(path = %self.path.display(), "lock released");
    }
}

fn acquire_advisory(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| CacheError::io("open lock file", path, err))?;
    let mut backoff = Backoff::new();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(err) if err.kind() == ErrorKind::WouldBlock => backoff.wait(path),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => backoff.wait(path),
            Err(err) if err.kind() == ErrorKind::Unsupported => {
                return Err(CacheError::LockUnsupported {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => {
                return Err(CacheError::Lock {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

fn acquire_marker(path: &Path) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => backoff.wait(path),
            Err(err) => {
                return Err(CacheError::Lock {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

struct Backoff {
    delay: Duration,
    announced: bool,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: INITIAL_BACKOFF,
            announced: false,
        }
    }

    fn wait(&mut self, path: &Path) {
        if !self.announced {
            debug!(path = %path.display(), "lock is held elsewhere; waiting");
            self.announced = true;
        }
        thread::sleep(self.delay);
        self.delay = (self.delay * 2).min(MAX_BACKOFF);
    }
}
