use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::changes::SOURCE_SUFFIX;
use crate::git::{self, GitError};

static ACTIVE: Mutex<Option<ActiveTrace>> = Mutex::new(None);

/// How the tracer's scope root is named: a closed set of cases, each
/// resolving to one concrete directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRoot {
    /// An explicit directory, used as-is.
    Dir(PathBuf),
    /// The directory holding a given source file.
    SourceFile(PathBuf),
    /// The top level of the repository enclosing the current directory.
    Repository,
}

#[derive(Debug)]
pub enum ScopeRootError {
    NoParent(PathBuf),
    Git(GitError),
}

impl std::fmt::Display for ScopeRootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoParent(path) => {
                write!(f, "`{}` has no parent directory to scope to", path.display())
            }
            Self::Git(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ScopeRootError {}

impl From<GitError> for ScopeRootError {
    fn from(value: GitError) -> Self {
        Self::Git(value)
    }
}

impl ScopeRoot {
    pub fn resolve(&self) -> Result<PathBuf, ScopeRootError> {
        match self {
            Self::Dir(path) => Ok(path.clone()),
            Self::SourceFile(file) => file
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .ok_or_else(|| ScopeRootError::NoParent(file.clone())),
            Self::Repository => Ok(git::toplevel()?),
        }
    }
}

#[derive(Debug)]
struct ActiveTrace {
    root: PathBuf,
    excluded: PathBuf,
    touched: BTreeSet<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TraceError {
    AlreadyActive,
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive => {
                write!(f, "a trace scope is already active in this process")
            }
        }
    }
}

impl std::error::Error for TraceError {}

/// Exclusive claim on the process-wide call hook.
///
/// Exactly one scope may exist at a time; the hook is released when the
/// scope is finished or dropped, including during unwinding. `finish`
/// hands back the set of source files observed while the scope was held.
#[derive(Debug)]
pub struct TraceScope {
    finished: bool,
}

impl TraceScope {
    /// Install the hook, recording calls into files under `root` while
    /// ignoring `excluded` (the file driving the run, so the wrap layer's
    /// own bookkeeping never counts as coverage).
    pub fn attach(root: &Path, excluded: &Path) -> Result<Self, TraceError> {
        let mut slot = lock_active();
        if slot.is_some() {
            return Err(TraceError::AlreadyActive);
        }
        *slot = Some(ActiveTrace {
            root: root.to_path_buf(),
            excluded: excluded.to_path_buf(),
            touched: BTreeSet::new(),
        });
        Ok(Self { finished: false })
    }

    /// Release the hook and return the touched file set.
    pub fn finish(mut self) -> BTreeSet<PathBuf> {
        self.finished = true;
        lock_active()
            .take()
            .map(|active| active.touched)
            .unwrap_or_default()
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        if !self.finished {
            lock_active().take();
        }
    }
}

/// Hook entry point: instrumented code reports the source file of every
/// observed call here. A no-op when no scope is active.
pub fn record_call(path: &Path) {
    let mut slot = lock_active();
    let Some(active) = slot.as_mut() else {
        return;
    };
    if path == active.excluded {
        return;
    }
    if !path.to_string_lossy().ends_with(SOURCE_SUFFIX) {
        return;
    }
    if !path.starts_with(&active.root) {
        return;
    }
    active.touched.insert(path.to_path_buf());
}

fn lock_active() -> MutexGuard<'static, Option<ActiveTrace>> {
    ACTIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) fn serialize_hook_for_tests() -> MutexGuard<'static, ()> {
    static HOOK_TEST_LOCK: Mutex<()> = Mutex::new(());
    HOOK_TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
