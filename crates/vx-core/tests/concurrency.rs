use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use vx_core::vx_domain::{EnvMetadata, EnvOptions, Installed};
use vx_core::{LockStrategy, VenvCache};

fn meta(name: &str) -> EnvMetadata {
    EnvMetadata::new(format!("/venvs/{name}"), format!("/venvs/{name}/bin"), false)
}

fn seed(index: &Path, names: &[&str]) {
    let cache = VenvCache::new(index);
    for name in names {
        let mut installed = Installed::new();
        installed.insert_registry(name, "1.0");
        cache
            .store(installed, meta(name), "py3.11", EnvOptions::new())
            .expect("seed");
    }
}

fn indexed_paths(index: &Path) -> Vec<String> {
    fs::read_to_string(index)
        .expect("index")
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("one record per line");
            value["metadata"]["env_path"].as_str().expect("env_path").to_string()
        })
        .collect()
}

fn overlapping_removals(strategy: LockStrategy) {
    let temp = tempfile::tempdir().expect("tempdir");
    let index = temp.path().join("venvs.idx");
    seed(&index, &["a", "b", "c"]);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["/venvs/a", "/venvs/b"]
        .into_iter()
        .map(|env_path| {
            let cache = VenvCache::new(&index)
                .with_lock_strategy(strategy)
                .with_write_delay(Some(Duration::from_millis(150)));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.remove(env_path).expect("remove")
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("join"), 1);
    }

    assert_eq!(indexed_paths(&index), vec!["/venvs/c".to_string()]);
}

#[test]
fn overlapping_removals_under_advisory_lock() {
    overlapping_removals(LockStrategy::Advisory);
}

#[test]
fn overlapping_removals_under_exclusive_create() {
    overlapping_removals(LockStrategy::ExclusiveCreate);
}

#[test]
fn overlapping_stores_keep_every_line_whole() {
    let temp = tempfile::tempdir().expect("tempdir");
    let index = temp.path().join("nested").join("venvs.idx");
    let names: Vec<String> = (0..6).map(|i| format!("env{i}")).collect();

    let barrier = Arc::new(Barrier::new(names.len()));
    let handles: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let cache = VenvCache::new(&index)
                .with_lock_strategy(LockStrategy::ExclusiveCreate)
                .with_write_delay(Some(Duration::from_millis(20)));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .store(Installed::new(), meta(&name), "py3.11", EnvOptions::new())
                    .expect("store");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    let mut paths = indexed_paths(&index);
    paths.sort();
    let expected: Vec<String> = names.iter().map(|name| format!("/venvs/{name}")).collect();
    assert_eq!(paths, expected);
    assert!(!index.with_file_name("venvs.idx.lock").exists());
}
