use std::io;
use std::path::PathBuf;

use crate::changes::{self, ChangeError};
use crate::config::{RunConfig, RunFlags};
use crate::engine::{self, Selection};
use crate::store::{self, CoverageMap, CoverageRecord, TestId};
use crate::trace::{ScopeRoot, ScopeRootError, TraceError, TraceScope};

/// What the host observed for one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    Scope(ScopeRootError),
    Change(ChangeError),
    Trace(TraceError),
    Store(io::Error),
    MissingBaseline,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scope(err) => write!(f, "{err}"),
            Self::Change(err) => write!(f, "{err}"),
            Self::Trace(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "unable to write coverage store: {err}"),
            Self::MissingBaseline => write!(f, "skipping requires a baseline revision"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ScopeRootError> for SessionError {
    fn from(value: ScopeRootError) -> Self {
        Self::Scope(value)
    }
}

impl From<ChangeError> for SessionError {
    fn from(value: ChangeError) -> Self {
        Self::Change(value)
    }
}

impl From<TraceError> for SessionError {
    fn from(value: TraceError) -> Self {
        Self::Trace(value)
    }
}

/// One engine run, driven by the host test runner through four hooks:
/// `configure` before anything happens, `plan` before execution starts,
/// `run_test` wrapping each test, and `finish` after the last one.
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    store_path: PathBuf,
    flags: RunFlags,
    baseline: Option<String>,
    coverage: CoverageMap,
}

impl Session {
    /// Fix the run's flags and baseline, loading the store when either
    /// skipping or gathering will need it.
    pub fn configure(scope: ScopeRoot, config: &RunConfig) -> Result<Self, SessionError> {
        let root = scope.resolve()?;
        let flags = config.flags;
        let coverage = if flags.skip || flags.gather {
            store::load(&config.store_path)
        } else {
            CoverageMap::new()
        };
        Ok(Self {
            root,
            store_path: config.store_path.clone(),
            flags,
            baseline: config.baseline.clone(),
            coverage,
        })
    }

    pub fn coverage(&self) -> &CoverageMap {
        &self.coverage
    }

    /// Partition the host's candidate list. With skipping disabled this
    /// keeps everything; otherwise the change set against the baseline
    /// drives the decision engine.
    pub fn plan(&self, candidates: &[TestId]) -> Result<Selection, SessionError> {
        if !self.flags.skip {
            return Ok(Selection {
                keep: candidates.to_vec(),
                skip: Vec::new(),
            });
        }
        let baseline = self
            .baseline
            .as_deref()
            .ok_or(SessionError::MissingBaseline)?;
        let changes = changes::since(baseline)?;
        Ok(engine::select(candidates, &self.coverage, &changes))
    }

    /// Execute one test under the tracer and fold its result in: a pass
    /// replaces the record with the freshly observed file set, a failure
    /// drops any prior record, a skip leaves the store untouched. The
    /// trace hook is released even if `body` unwinds.
    pub fn run_test<F>(&mut self, id: &TestId, body: F) -> Result<Outcome, SessionError>
    where
        F: FnOnce() -> Outcome,
    {
        if !self.flags.gather {
            return Ok(body());
        }

        let scope = TraceScope::attach(&self.root, &id.file)?;
        let outcome = body();
        let touched = scope.finish();

        match outcome {
            Outcome::Passed => {
                self.coverage.insert(
                    id.key(),
                    CoverageRecord {
                        files: touched,
                        fspath: id.file.clone(),
                    },
                );
            }
            Outcome::Failed => {
                self.coverage.remove(&id.key());
            }
            Outcome::Skipped => {}
        }
        Ok(outcome)
    }

    /// Persist the store once at the end of the run. Nothing is written
    /// with gathering disabled or an empty map.
    pub fn finish(&self) -> Result<(), SessionError> {
        if self.flags.gather && !self.coverage.is_empty() {
            store::save(&self.store_path, &self.coverage).map_err(SessionError::Store)?;
        }
        Ok(())
    }
}
