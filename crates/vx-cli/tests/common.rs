#![allow(dead_code)]

use std::fs;
use std::path::Path;

use assert_cmd::assert::Assert;
use serde_json::Value;

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("json output")
}

/// Parses every index line, failing on anything that is not one JSON record.
pub fn index_records(cache_dir: &Path) -> Vec<Value> {
    let contents = fs::read_to_string(cache_dir.join("venvs.idx")).unwrap_or_default();
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|err| panic!("bad line {line:?}: {err}")))
        .collect()
}

pub fn env_paths(cache_dir: &Path) -> Vec<String> {
    index_records(cache_dir)
        .iter()
        .map(|record| {
            record["metadata"]["env_path"]
                .as_str()
                .expect("env_path")
                .to_string()
        })
        .collect()
}
