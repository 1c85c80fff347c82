use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::warn;
use vx_domain::{
    normalize_dist_name, Dependency, EnvMetadata, EnvOptions, EnvRecord, Installed, Requirements,
    Source,
};

use crate::cache::VenvQuery;
use crate::config::Config;
use crate::error::CacheError;
use crate::usage::UsageManager;
use crate::ExecutionOutcome;

#[derive(Clone, Debug, Default)]
pub struct CacheFindRequest {
    pub uuid: Option<String>,
    pub requirements: Vec<String>,
    pub interpreter: String,
    pub options: Vec<String>,
    pub live: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CacheListRequest;

#[derive(Clone, Debug, Default)]
pub struct CacheStoreRequest {
    pub installed: Vec<String>,
    pub env_path: String,
    pub env_bin_path: Option<String>,
    pub pip_installed: bool,
    pub interpreter: String,
    pub options: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CacheRemoveRequest {
    pub env_path: String,
}

#[derive(Clone, Debug, Default)]
pub struct CacheCleanRequest {
    pub max_days: Option<u32>,
}

pub fn cache_find(config: &Config, request: CacheFindRequest) -> Result<ExecutionOutcome> {
    let query = match request.uuid {
        Some(uuid) => VenvQuery::uuid(uuid),
        None => {
            let requirements = match parse_requirements(&request.requirements) {
                Ok(requirements) => requirements,
                Err(outcome) => return Ok(outcome),
            };
            let options = match parse_options(&request.options) {
                Ok(options) => options,
                Err(outcome) => return Ok(outcome),
            };
            VenvQuery::requirements(requirements, request.interpreter, options)
        }
    };
    let cache = config.open_cache();
    let found = if request.live {
        cache.get_live_venv(&query)
    } else {
        cache.get_venv(&query)
    };
    match found {
        Ok(Some(metadata)) => Ok(ExecutionOutcome::success(
            format!("found {}", metadata.env_path),
            json!({ "status": "hit", "venv": metadata }),
        )),
        Ok(None) => Ok(ExecutionOutcome::success(
            "no matching environment",
            json!({ "status": "miss", "venv": Value::Null }),
        )),
        Err(err) => Ok(cache_failure(&err)),
    }
}

pub fn cache_list(config: &Config, _request: CacheListRequest) -> Result<ExecutionOutcome> {
    let cache = config.open_cache();
    let venvs: Vec<EnvMetadata> = match cache.get_venvs_metadata() {
        Ok(iter) => iter.collect(),
        Err(err) => return Ok(cache_failure(&err)),
    };
    let message = if venvs.is_empty() {
        "no environments indexed".to_string()
    } else {
        venvs
            .iter()
            .map(|venv| venv.env_path.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "index": cache.path().display().to_string(),
            "source": config.location().source,
            "count": venvs.len(),
            "venvs": venvs,
        }),
    ))
}

pub fn cache_store(config: &Config, request: CacheStoreRequest) -> Result<ExecutionOutcome> {
    if request.env_path.trim().is_empty() {
        return Ok(ExecutionOutcome::user_error(
            "an environment path is required",
            json!({ "reason": "missing_env_path" }),
        ));
    }
    let installed = match parse_installed(&request.installed) {
        Ok(installed) => installed,
        Err(outcome) => return Ok(outcome),
    };
    let options = match parse_options(&request.options) {
        Ok(options) => options,
        Err(outcome) => return Ok(outcome),
    };
    let env_bin_path = request
        .env_bin_path
        .unwrap_or_else(|| format!("{}/bin", request.env_path.trim_end_matches('/')));
    let metadata = EnvMetadata::new(request.env_path, env_bin_path, request.pip_installed);
    let cache = config.open_cache();
    match cache.store(installed, metadata, &request.interpreter, options) {
        Ok(record) => Ok(ExecutionOutcome::success(
            format!("stored {}", record.metadata.env_path),
            json!({ "status": "stored", "record": record_details(&record) }),
        )),
        Err(err @ CacheError::DuplicateEnv { .. }) => Ok(ExecutionOutcome::user_error(
            err.to_string(),
            json!({ "code": err.code(), "reason": "duplicate_env_path" }),
        )),
        Err(err) => Ok(cache_failure(&err)),
    }
}

pub fn cache_remove(config: &Config, request: CacheRemoveRequest) -> Result<ExecutionOutcome> {
    let cache = config.open_cache();
    match cache.remove(&request.env_path) {
        Ok(removed) => Ok(ExecutionOutcome::success(
            if removed == 0 {
                format!("{} was not indexed", request.env_path)
            } else {
                format!("removed {}", request.env_path)
            },
            json!({ "status": "removed", "removed": removed, "env_path": request.env_path }),
        )),
        Err(err) => Ok(cache_failure(&err)),
    }
}

pub fn cache_clean(config: &Config, request: CacheCleanRequest) -> Result<ExecutionOutcome> {
    let max_days = request.max_days.unwrap_or_else(|| config.retention_days());
    let cache = config.open_cache();
    let destroyed = UsageManager::new(config.usage_path(), &cache)
        .and_then(|manager| manager.clean_unused(max_days));
    match destroyed {
        Ok(destroyed) => Ok(ExecutionOutcome::success(
            format!("destroyed {} unused environment(s)", destroyed.len()),
            json!({
                "status": "cleaned",
                "max_days": max_days,
                "destroyed": destroyed,
            }),
        )),
        Err(err) => Ok(cache_failure(&err)),
    }
}

fn cache_failure(err: &CacheError) -> ExecutionOutcome {
    ExecutionOutcome::failure(
        err.to_string(),
        json!({ "code": err.code(), "reason": "cache_error" }),
    )
}

fn record_details(record: &EnvRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

/// `pypi::name<constraint>`, `vcs::url`, or a bare PEP 508 requirement.
fn split_source(raw: &str) -> Result<(Source, &str)> {
    match raw.split_once("::") {
        Some((prefix, rest)) => Ok((prefix.parse()?, rest)),
        None => Ok((Source::Pypi, raw)),
    }
}

fn parse_requirements(raw: &[String]) -> Result<Requirements, ExecutionOutcome> {
    let mut requirements = Requirements::new();
    for item in raw {
        let parsed = split_source(item)
            .and_then(|(source, text)| Ok(Dependency::parse(source, text)?));
        match parsed {
            Ok(dependency) => requirements.insert(dependency),
            Err(err) => {
                warn!(requirement = %item, %err, "ignoring request with malformed requirement");
                return Err(ExecutionOutcome::user_error(
                    format!("invalid requirement `{item}`"),
                    json!({ "reason": "invalid_requirement", "error": err.to_string() }),
                ));
            }
        }
    }
    Ok(requirements)
}

fn parse_installed(raw: &[String]) -> Result<Installed, ExecutionOutcome> {
    let mut installed = Installed::new();
    for item in raw {
        if let Err(err) = add_installed(&mut installed, item) {
            return Err(ExecutionOutcome::user_error(
                format!("invalid installed entry `{item}`"),
                json!({
                    "reason": "invalid_installed",
                    "error": err.to_string(),
                    "hint": "use name==version or vcs::url",
                }),
            ));
        }
    }
    Ok(installed)
}

fn add_installed(installed: &mut Installed, item: &str) -> Result<()> {
    let (source, text) = split_source(item)?;
    match source {
        Source::Vcs if !text.trim().is_empty() => installed.insert_url(text.trim()),
        Source::Pypi => {
            let Some((name, version)) = text.split_once("==") else {
                bail!("missing `==version`");
            };
            if normalize_dist_name(name).is_empty() || version.trim().is_empty() {
                bail!("empty name or version");
            }
            installed.insert_registry(name, version.trim());
        }
        Source::Vcs => bail!("empty url"),
    }
    Ok(())
}

fn parse_options(raw: &[String]) -> Result<EnvOptions, ExecutionOutcome> {
    let mut options = EnvOptions::new();
    for item in raw {
        let Some((group, flag)) = item.split_once('=') else {
            return Err(ExecutionOutcome::user_error(
                format!("invalid option `{item}`"),
                json!({ "reason": "invalid_option", "hint": "use group=flag" }),
            ));
        };
        options.insert(group.trim(), flag.trim());
    }
    Ok(options)
}
