use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::changes::ChangeSet;
use crate::store::{CoverageMap, TestId};

/// Partition of the candidate list, host order preserved on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub keep: Vec<TestId>,
    pub skip: Vec<TestId>,
}

/// Decide which candidates must run. A test is kept when anything it is
/// known to exercise changed, when no trustworthy coverage exists for its
/// file, or when its own declaration appears in the diff. Everything else
/// is skippable. The policy only ever widens the kept set; a test without
/// history always runs.
pub fn select(candidates: &[TestId], coverage: &CoverageMap, changes: &ChangeSet) -> Selection {
    let affected = affected_keys(coverage, changes);
    let covered_files = covered_test_files(coverage);

    let mut selection = Selection::default();
    for candidate in candidates {
        let kept = affected.contains(candidate.key().as_str())
            || !covered_files.contains(&candidate.file)
            || changes
                .tests
                .contains(&(candidate.file.clone(), candidate.name.clone()));
        if kept {
            selection.keep.push(candidate.clone());
        } else {
            selection.skip.push(candidate.clone());
        }
    }
    selection
}

/// Store keys whose recorded file set intersects the changed files.
pub fn affected_keys(coverage: &CoverageMap, changes: &ChangeSet) -> BTreeSet<String> {
    coverage
        .iter()
        .filter(|(_, record)| record.files.iter().any(|file| changes.files.contains(file)))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Test files for which at least one coverage record exists. A candidate
/// living outside this set has never been observed and cannot be skipped.
pub fn covered_test_files(coverage: &CoverageMap) -> BTreeSet<PathBuf> {
    coverage
        .values()
        .map(|record| record.fspath.clone())
        .collect()
}
