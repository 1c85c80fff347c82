#![deny(clippy::all)]

pub mod cache;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lock;
pub mod outcome;
pub mod usage;

pub use crate::cache::{VenvCache, VenvQuery, INDEX_FILENAME};
pub use crate::commands::*;
pub use crate::config::{CacheLocation, Config, DEFAULT_RETENTION_DAYS};
pub use crate::error::CacheError;
pub use crate::lock::{lock_path_for, LockStrategy, ScopedLock};
pub use crate::outcome::{format_status_message, to_json_response, CommandStatus, ExecutionOutcome};
pub use crate::usage::{destroy_venv, UsageManager, USAGE_FILENAME};
pub use vx_domain;
