use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod atomic;

/// Bumped whenever the persisted shape changes; any other version on disk
/// is treated as no data at all.
pub const STORE_VERSION: u64 = 1;

pub const DEFAULT_STORE_FILE: &str = ".sift.coverage";

/// A test's identity: the file declaring it plus its name. Stable across
/// runs until the test is renamed or moved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestId {
    pub file: PathBuf,
    pub name: String,
}

impl TestId {
    pub fn new(file: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
        }
    }

    /// Identity string used as the store key: `<file>::<name>`.
    pub fn key(&self) -> String {
        format!("{}::{}", self.file.display(), self.name)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (file, name) = raw.rsplit_once("::")?;
        if file.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(file, name))
    }
}

/// Source files a test was observed to execute on its last passing run,
/// plus the test's own file. The own file rides along separately because
/// the tracer excludes it from the observed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub files: BTreeSet<PathBuf>,
    pub fspath: PathBuf,
}

pub type CoverageMap = BTreeMap<String, CoverageRecord>;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u64,
    coverage: CoverageMap,
}

/// Read the store. Missing files, unreadable content, an unexpected shape,
/// and a version mismatch all load as an empty map; stale data is dropped
/// rather than trusted or surfaced as an error.
pub fn load(path: &Path) -> CoverageMap {
    let Ok(content) = fs::read_to_string(path) else {
        return CoverageMap::new();
    };
    let Ok(document) = serde_json::from_str::<StoreDocument>(&content) else {
        return CoverageMap::new();
    };
    if document.version != STORE_VERSION {
        return CoverageMap::new();
    }
    document.coverage
}

/// Persist the whole map with the current version tag in one atomic
/// replace.
pub fn save(path: &Path, coverage: &CoverageMap) -> io::Result<()> {
    let document = StoreDocument {
        version: STORE_VERSION,
        coverage: coverage.clone(),
    };
    let rendered = serde_json::to_string_pretty(&document)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    atomic::replace_file(path, rendered.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::{CoverageMap, CoverageRecord, STORE_VERSION, TestId, load, save};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn sample_map() -> CoverageMap {
        let mut map = CoverageMap::new();
        map.insert(
            TestId::new("/repo/tests/test_math.rs", "test_cube").key(),
            CoverageRecord {
                files: [PathBuf::from("/repo/lib/math.rs")].into_iter().collect(),
                fspath: PathBuf::from("/repo/tests/test_math.rs"),
            },
        );
        map.insert(
            TestId::new("/repo/tests/test_io.rs", "test_read").key(),
            CoverageRecord {
                files: [
                    PathBuf::from("/repo/lib/io.rs"),
                    PathBuf::from("/repo/lib/buf.rs"),
                ]
                .into_iter()
                .collect(),
                fspath: PathBuf::from("/repo/tests/test_io.rs"),
            },
        );
        map
    }

    #[test]
    fn key_and_parse_round_trip() {
        let id = TestId::new("/repo/tests/test_math.rs", "test_cube");
        assert_eq!(id.key(), "/repo/tests/test_math.rs::test_cube");
        assert_eq!(TestId::parse(&id.key()), Some(id));
    }

    #[test]
    fn parse_rejects_malformed_identities() {
        assert_eq!(TestId::parse("no-separator"), None);
        assert_eq!(TestId::parse("::only_name"), None);
        assert_eq!(TestId::parse("only/file.rs::"), None);
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn garbage_content_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        std::fs::write(&path, "not json at all").expect("seed");
        assert!(load(&path).is_empty());

        std::fs::write(&path, r#"{"unexpected": "shape"}"#).expect("seed");
        assert!(load(&path).is_empty());
    }

    #[test]
    fn version_mismatch_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        let stale = format!(
            r#"{{"version": {}, "coverage": {{"t.rs::test_a": {{"files": [], "fspath": "t.rs"}}}}}}"#,
            STORE_VERSION + 1
        );
        std::fs::write(&path, stale).expect("seed");
        assert!(load(&path).is_empty());
    }

    #[test]
    fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        let map = sample_map();

        save(&path, &map).expect("save");
        assert_eq!(load(&path), map);

        // Idempotent: persisting what was loaded changes nothing.
        save(&path, &load(&path)).expect("save again");
        assert_eq!(load(&path), map);
    }

    #[test]
    fn save_stamps_the_current_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        save(&path, &sample_map()).expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["version"], STORE_VERSION);
        assert!(raw["coverage"].is_object());
    }
}
