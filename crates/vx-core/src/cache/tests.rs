use std::fs;

use tempfile::TempDir;
use vx_domain::{Dependency, Source};

use super::*;

fn new_cache() -> (TempDir, VenvCache) {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache = VenvCache::new(temp.path().join("venvs.idx"));
    (temp, cache)
}

fn installed(pairs: &[(&str, &str)]) -> Installed {
    let mut installed = Installed::new();
    for (name, version) in pairs {
        installed.insert_registry(name, *version);
    }
    installed
}

fn meta(uuid: &str) -> EnvMetadata {
    EnvMetadata::new(format!("/venvs/{uuid}"), format!("/venvs/{uuid}/bin"), true)
}

fn by_requirements(specs: &[(&str, &str)]) -> VenvQuery {
    let requirements = specs
        .iter()
        .map(|(name, constraint)| Dependency::registry(name, constraint).expect("dep"))
        .collect();
    VenvQuery::requirements(requirements, "py3.11", EnvOptions::new())
}

#[test]
fn missing_index_is_an_empty_cache() -> Result<()> {
    let (_temp, cache) = new_cache();
    assert!(cache.records()?.is_empty());
    assert!(cache.get_venv(&VenvQuery::uuid("nope"))?.is_none());
    assert_eq!(cache.get_venvs_metadata()?.count(), 0);
    Ok(())
}

#[test]
fn stored_record_is_found_again() -> Result<()> {
    let (_temp, cache) = new_cache();
    let stored = cache.store(installed(&[("foo", "5")]), meta("u1"), "py3.11", EnvOptions::new())?;
    assert!(stored.timestamp > 0);

    let hit = cache.get_venv(&by_requirements(&[("foo", "==5")]))?;
    assert_eq!(hit, Some(meta("u1")));
    assert!(cache.get_venv(&by_requirements(&[("foo", "==6")]))?.is_none());
    Ok(())
}

#[test]
fn each_record_is_one_json_line() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(installed(&[("a", "1")]), meta("u1"), "py3.11", EnvOptions::new())?;
    cache.store(installed(&[("b", "2")]), meta("u2"), "py3.11", EnvOptions::new())?;
    let contents = fs::read_to_string(cache.path()).expect("read index");
    assert!(contents.ends_with('\n'));
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).expect("json line");
        for key in ["timestamp", "installed", "metadata", "interpreter", "options"] {
            assert!(value.get(key).is_some(), "missing {key} in {line}");
        }
    }
    Ok(())
}

#[test]
fn duplicate_env_path_is_rejected() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(Installed::new(), meta("u1"), "py3.11", EnvOptions::new())?;
    let err = cache
        .store(Installed::new(), meta("u1"), "py3.12", EnvOptions::new())
        .expect_err("duplicate");
    assert!(matches!(err, CacheError::DuplicateEnv { .. }));
    assert_eq!(err.code(), "VX802");
    assert_eq!(cache.records()?.len(), 1);
    Ok(())
}

#[test]
fn uuid_lookup_uses_trailing_segment() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(installed(&[("a", "1")]), meta("first"), "py3.11", EnvOptions::new())?;
    cache.store(installed(&[("b", "1")]), meta("second"), "py3.10", EnvOptions::new())?;
    let found = cache.get_venv(&VenvQuery::uuid("second"))?;
    assert_eq!(found.map(|m| m.env_path), Some("/venvs/second".to_string()));
    Ok(())
}

#[test]
fn highest_version_wins_over_recency() -> Result<()> {
    let (_temp, cache) = new_cache();
    for (uuid, version) in [("v3", "3"), ("v7", "7"), ("v5", "5")] {
        cache.store(installed(&[("dep", version)]), meta(uuid), "py3.11", EnvOptions::new())?;
    }
    let found = cache.get_venv(&by_requirements(&[("dep", "")]))?;
    assert_eq!(found.map(|m| m.uuid().to_string()), Some("v7".to_string()));
    Ok(())
}

#[test]
fn remove_is_idempotent() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(installed(&[("a", "1")]), meta("keep"), "py3.11", EnvOptions::new())?;
    cache.store(installed(&[("b", "1")]), meta("drop"), "py3.11", EnvOptions::new())?;

    assert_eq!(cache.remove("/venvs/drop")?, 1);
    let after_first = fs::read_to_string(cache.path()).expect("read");
    assert_eq!(cache.remove("/venvs/drop")?, 0);
    let after_second = fs::read_to_string(cache.path()).expect("read");
    assert_eq!(after_first, after_second);

    let remaining: Vec<String> = cache.get_venvs_metadata()?.map(|m| m.env_path).collect();
    assert_eq!(remaining, vec!["/venvs/keep".to_string()]);
    Ok(())
}

#[test]
fn remove_on_missing_index_is_a_no_op() -> Result<()> {
    let (_temp, cache) = new_cache();
    assert_eq!(cache.remove("/venvs/ghost")?, 0);
    assert!(!cache.path().exists());
    Ok(())
}

#[test]
fn corrupt_lines_are_skipped_on_read_and_kept_on_rewrite() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(installed(&[("a", "1")]), meta("good"), "py3.11", EnvOptions::new())?;
    let mut contents = fs::read_to_string(cache.path()).expect("read");
    contents.push_str("{\"timestamp\": 1, \"metadata\n");
    fs::write(cache.path(), contents).expect("corrupt");
    cache.store(installed(&[("b", "1")]), meta("other"), "py3.11", EnvOptions::new())?;

    assert_eq!(cache.records()?.len(), 2);
    assert_eq!(cache.remove("/venvs/other")?, 1);
    let rewritten = fs::read_to_string(cache.path()).expect("read");
    assert_eq!(rewritten.lines().count(), 2);
    assert!(rewritten.contains("{\"timestamp\": 1, \"metadata"));
    assert_eq!(cache.records()?.len(), 1);
    Ok(())
}

#[test]
fn invalid_utf8_line_is_skipped_not_fatal() -> Result<()> {
    let (_temp, cache) = new_cache();
    cache.store(installed(&[("a", "1")]), meta("good"), "py3.11", EnvOptions::new())?;
    let mut bytes = fs::read(cache.path()).expect("read");
    bytes.extend_from_slice(b"{\"timestamp\": \xff\xfe}\n");
    fs::write(cache.path(), &bytes).expect("corrupt");
    cache.store(installed(&[("b", "1")]), meta("other"), "py3.11", EnvOptions::new())?;

    assert_eq!(cache.records()?.len(), 2);
    assert_eq!(cache.get_venv(&VenvQuery::uuid("other"))?, Some(meta("other")));
    assert_eq!(cache.remove("/venvs/good")?, 1);
    let rewritten = fs::read(cache.path()).expect("read");
    assert!(rewritten
        .windows(2)
        .any(|pair| pair == [0xff, 0xfe]));
    assert_eq!(cache.get_venvs_metadata()?.count(), 1);
    Ok(())
}

#[test]
fn live_lookup_drops_vanished_environments() -> Result<()> {
    let (temp, cache) = new_cache();
    let env_dir = temp.path().join("envs").join("abc123");
    fs::create_dir_all(&env_dir).expect("env dir");
    let env_path = env_dir.display().to_string();
    cache.store(
        Installed::new(),
        EnvMetadata::new(env_path.clone(), format!("{env_path}/bin"), false),
        "py3.11",
        EnvOptions::new(),
    )?;
    let query = VenvQuery::requirements(Requirements::new(), "py3.11", EnvOptions::new());

    assert!(cache.get_live_venv(&query)?.is_some());
    fs::remove_dir_all(&env_dir).expect("remove env");
    assert!(cache.get_live_venv(&query)?.is_none());
    assert!(cache.records()?.is_empty());
    Ok(())
}

#[test]
fn url_requirements_round_trip_through_the_index() -> Result<()> {
    let (_temp, cache) = new_cache();
    let url = "git+https://example.com/tool.git";
    let mut stuff = installed(&[("foo", "1.0")]);
    stuff.insert_url(url);
    cache.store(stuff, meta("vcs"), "py3.11", EnvOptions::new())?;

    let mut requirements: Requirements = [Dependency::parse(Source::Pypi, "foo<2").expect("foo")]
        .into_iter()
        .collect();
    requirements.insert(Dependency::parse(Source::Vcs, url).expect("url"));
    let query = VenvQuery::requirements(requirements, "py3.11", EnvOptions::new());
    assert_eq!(cache.get_venv(&query)?, Some(meta("vcs")));
    Ok(())
}

#[test]
fn exclusive_create_strategy_cleans_up_its_marker() -> Result<()> {
    let (_temp, cache) = new_cache();
    let cache = cache.with_lock_strategy(LockStrategy::ExclusiveCreate);
    cache.store(Installed::new(), meta("u1"), "py3.11", EnvOptions::new())?;
    cache.remove("/venvs/u1")?;
    assert!(!lock_path_for(cache.path()).exists());
    Ok(())
}
