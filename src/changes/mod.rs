use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::git::{self, GitError};

/// File extension the engine attributes coverage and changes to.
pub const SOURCE_SUFFIX: &str = ".rs";

const TEST_MARKER: &str = "fn test_";
const NULL_PATH: &str = "/dev/null";

/// Everything the diff against the baseline told us: which source files
/// changed, and which test declarations appear anywhere in the diff text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: BTreeSet<PathBuf>,
    pub tests: BTreeSet<(PathBuf, String)>,
}

#[derive(Debug)]
pub enum DiffFormatError {
    UnrecognizedHeader(String),
}

impl std::fmt::Display for DiffFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecognizedHeader(path) => {
                write!(f, "diff header path `{path}` does not start with a/ or b/")
            }
        }
    }
}

impl std::error::Error for DiffFormatError {}

#[derive(Debug)]
pub enum ChangeError {
    Git(GitError),
    Format(DiffFormatError),
}

impl std::fmt::Display for ChangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git(err) => write!(f, "{err}"),
            Self::Format(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChangeError {}

impl From<GitError> for ChangeError {
    fn from(value: GitError) -> Self {
        Self::Git(value)
    }
}

impl From<DiffFormatError> for ChangeError {
    fn from(value: DiffFormatError) -> Self {
        Self::Format(value)
    }
}

/// Scan unified-diff text for changed source files and changed tests.
///
/// The test-declaration scan is deliberately permissive: any line carrying
/// the marker counts, whether added, removed, or context, and is attributed
/// to the most recently seen file header. Over-selecting is acceptable;
/// under-selecting is not.
pub fn extract(root: &Path, diff: &str) -> Result<ChangeSet, DiffFormatError> {
    let mut files = BTreeSet::new();
    let mut tests = BTreeSet::new();
    let mut current_file = PathBuf::new();

    for line in diff.lines() {
        if let Some(idx) = line.find(TEST_MARKER) {
            let declared = &line[idx + 3..];
            let name = declared.split('(').next().unwrap_or(declared);
            tests.insert((current_file.clone(), name.to_string()));
        }

        let Some(header_path) = line
            .strip_prefix("--- ")
            .or_else(|| line.strip_prefix("+++ "))
        else {
            continue;
        };
        if !header_path.ends_with(SOURCE_SUFFIX) {
            continue;
        }
        if header_path == NULL_PATH {
            continue;
        }
        let Some(relative) = header_path
            .strip_prefix("a/")
            .or_else(|| header_path.strip_prefix("b/"))
        else {
            return Err(DiffFormatError::UnrecognizedHeader(header_path.to_string()));
        };

        current_file = root.join(relative);
        files.insert(current_file.clone());
    }

    Ok(ChangeSet { files, tests })
}

/// Change set of the working tree against a baseline revision, with paths
/// resolved against the repository root.
pub fn since(baseline: &str) -> Result<ChangeSet, ChangeError> {
    let root = git::toplevel()?;
    let diff = git::diff_text(baseline)?;
    Ok(extract(&root, &diff)?)
}
