//! Selection of a previously built environment for a request.
//!
//! Everything here is a pure function over a snapshot of records; the
//! caller owns I/O and logging.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::dependency::{InstalledDependency, Requirements};
use crate::record::{EnvOptions, EnvRecord, Installed};
use crate::version::compare_versions;

/// A record proven to satisfy a request, with the installed descriptors
/// that did the satisfying.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub matching: Vec<InstalledDependency>,
    pub record: &'a EnvRecord,
}

/// First record, in index order, whose `env_path` ends in `uuid`.
#[must_use]
pub fn find_by_uuid<'a>(records: &'a [EnvRecord], uuid: &str) -> Option<&'a EnvRecord> {
    records.iter().find(|record| record.uuid() == uuid)
}

#[must_use]
pub fn find_by_requirements<'a>(
    records: &'a [EnvRecord],
    requested: &Requirements,
    interpreter: &str,
    options: &EnvOptions,
) -> Option<&'a EnvRecord> {
    let mut candidates: Vec<Candidate<'a>> = records
        .iter()
        .filter(|record| record.interpreter == interpreter && record.options == *options)
        .filter_map(|record| {
            record_satisfies(&record.installed, requested)
                .map(|matching| Candidate { matching, record })
        })
        .collect();
    match candidates.len() {
        0 => None,
        1 => candidates.pop().map(|candidate| candidate.record),
        _ => select_better_fit(&candidates),
    }
}

/// Returns the installed descriptors used to satisfy `requested`, or `None`
/// when the environment is missing something or carries extras the
/// request never asked for.
#[must_use]
pub fn record_satisfies(
    installed: &Installed,
    requested: &Requirements,
) -> Option<Vec<InstalledDependency>> {
    if requested.is_empty() {
        // a clean request only reuses a clean environment
        return installed.is_empty().then(Vec::new);
    }

    let mut matching = Vec::new();
    for (source, wanted) in requested.iter() {
        let available = installed.dependencies(source)?;
        let mut useful = BTreeSet::new();
        for dependency in wanted {
            let hit = available
                .iter()
                .find(|candidate| dependency.is_satisfied_by(candidate))?;
            useful.insert(hit.clone());
        }
        if useful != available {
            return None;
        }
        matching.extend(useful);
    }
    Some(matching)
}

/// Picks the candidate whose registry versions are highest position by
/// position. Every candidate holding a position's greatest version scores
/// its point; the rightmost candidate wins equal scores. Returns `None` only
/// for an empty input.
#[must_use]
pub fn select_better_fit<'a>(candidates: &[Candidate<'a>]) -> Option<&'a EnvRecord> {
    let aligned: Vec<Vec<&InstalledDependency>> = candidates
        .iter()
        .map(|candidate| {
            let mut sorted: Vec<&InstalledDependency> = candidate.matching.iter().collect();
            sorted.sort();
            sorted
        })
        .collect();
    let first = aligned.first()?;
    debug_assert!(
        aligned.iter().all(|deps| {
            deps.len() == first.len()
                && deps
                    .iter()
                    .zip(first.iter())
                    .all(|(left, right)| left == right)
        }),
        "best-fit candidates must share one sorted identity sequence"
    );
    let width = aligned.iter().map(Vec::len).min().unwrap_or(0);

    let mut scores = vec![0usize; aligned.len()];
    for position in 0..width {
        if !aligned[0][position].is_registry() {
            continue;
        }
        let best = aligned
            .iter()
            .map(|deps| deps[position].version())
            .max_by(|left, right| compare_versions(*left, *right));
        for (index, deps) in aligned.iter().enumerate() {
            if best.is_some_and(|top| {
                compare_versions(deps[position].version(), top) == Ordering::Equal
            }) {
                scores[index] += 1;
            }
        }
    }

    let best = scores
        .iter()
        .enumerate()
        .max_by_key(|(index, score)| (**score, *index))
        .map(|(index, _)| index)?;
    Some(candidates[best].record)
}
