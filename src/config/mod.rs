use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::store::DEFAULT_STORE_FILE;

pub const CONFIG_FILE: &str = ".sift.yml";

/// Running mode. Fixed once per run; each mode is just a pair of
/// independent skip/gather switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run everything, collect nothing: the engine has no effect.
    All,
    /// Skip stale tests and refresh coverage on the rest.
    Skip,
    /// Run everything and refresh all coverage.
    Gather,
    /// Skip stale tests; the store stays read-only.
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    pub skip: bool,
    pub gather: bool,
}

impl Mode {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "skip" => Ok(Self::Skip),
            "gather" => Ok(Self::Gather),
            "cache" => Ok(Self::Cache),
            _ => Err(ConfigError::InvalidMode(raw.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Skip => "skip",
            Self::Gather => "gather",
            Self::Cache => "cache",
        }
    }

    pub fn flags(self) -> RunFlags {
        match self {
            Self::All => RunFlags {
                skip: false,
                gather: false,
            },
            Self::Skip => RunFlags {
                skip: true,
                gather: true,
            },
            Self::Gather => RunFlags {
                skip: false,
                gather: true,
            },
            Self::Cache => RunFlags {
                skip: true,
                gather: false,
            },
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidMode(String),
    MissingBaseline(Mode),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
            Self::InvalidMode(value) => write!(f, "unknown mode `{value}`"),
            Self::MissingBaseline(mode) => {
                write!(f, "mode `{}` requires a baseline revision", mode.as_str())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    baseline: Option<String>,
    #[serde(default)]
    store: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub baseline: Option<String>,
    pub store: Option<PathBuf>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<String>,
    pub baseline: Option<String>,
    pub store: Option<PathBuf>,
}

/// Everything a run needs, validated: skip-capable modes must carry a
/// baseline, checked here so the failure happens before any test runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub mode: Mode,
    pub flags: RunFlags,
    pub baseline: Option<String>,
    pub store_path: PathBuf,
}

impl RunConfig {
    pub fn resolve(cwd: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match find_nearest_config(cwd) {
            Some(path) => load_config_file(&path)?,
            None => FileConfig::default(),
        };

        let mode = match &overrides.mode {
            Some(raw) => Mode::parse(raw)?,
            None => file.mode.unwrap_or(Mode::All),
        };
        let baseline = non_blank(overrides.baseline.clone()).or(file.baseline);
        let store = overrides
            .store
            .clone()
            .or(file.store)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE));
        let store_path = if store.is_absolute() {
            store
        } else {
            cwd.join(store)
        };

        let flags = mode.flags();
        if flags.skip && baseline.is_none() {
            return Err(ConfigError::MissingBaseline(mode));
        }

        Ok(Self {
            mode,
            flags,
            baseline,
            store_path,
        })
    }
}

pub fn find_nearest_config(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let raw: RawConfig = serde_yaml::from_str(&content)?;
    let mode = match raw.mode {
        Some(value) => Some(Mode::parse(&value)?),
        None => None,
    };
    Ok(FileConfig {
        mode,
        baseline: non_blank(raw.baseline),
        store: raw
            .store
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from),
    })
}

pub fn default_config_yaml() -> String {
    r#"# sift run configuration; command-line flags take precedence.
mode: all
# baseline: origin/main
store: .sift.coverage
"#
    .to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Mode, Overrides, RunConfig, find_nearest_config, load_config_file};
    use std::path::PathBuf;

    #[test]
    fn mode_parsing_accepts_the_four_modes_case_insensitively() {
        assert_eq!(Mode::parse("all").expect("all"), Mode::All);
        assert_eq!(Mode::parse("SKIP").expect("skip"), Mode::Skip);
        assert_eq!(Mode::parse(" gather ").expect("gather"), Mode::Gather);
        assert_eq!(Mode::parse("cache").expect("cache"), Mode::Cache);
        assert!(matches!(
            Mode::parse("turbo"),
            Err(ConfigError::InvalidMode(_))
        ));
    }

    #[test]
    fn mode_flags_match_the_mode_table() {
        assert_eq!(Mode::All.flags(), super::RunFlags { skip: false, gather: false });
        assert_eq!(Mode::Skip.flags(), super::RunFlags { skip: true, gather: true });
        assert_eq!(Mode::Gather.flags(), super::RunFlags { skip: false, gather: true });
        assert_eq!(Mode::Cache.flags(), super::RunFlags { skip: true, gather: false });
    }

    #[test]
    fn skip_and_cache_require_a_baseline() {
        let dir = tempfile::tempdir().expect("tempdir");
        for mode in ["skip", "cache"] {
            let err = RunConfig::resolve(
                dir.path(),
                &Overrides {
                    mode: Some(mode.to_string()),
                    ..Default::default()
                },
            )
            .expect_err("must fail without baseline");
            assert!(matches!(err, ConfigError::MissingBaseline(_)));
        }
    }

    #[test]
    fn gather_and_all_need_no_baseline() {
        let dir = tempfile::tempdir().expect("tempdir");
        for mode in ["all", "gather"] {
            let config = RunConfig::resolve(
                dir.path(),
                &Overrides {
                    mode: Some(mode.to_string()),
                    ..Default::default()
                },
            )
            .expect("resolves");
            assert_eq!(config.baseline, None);
        }
    }

    #[test]
    fn command_line_beats_the_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(super::CONFIG_FILE),
            "mode: cache\nbaseline: main\nstore: from-file.json\n",
        )
        .expect("write config");

        let config = RunConfig::resolve(
            dir.path(),
            &Overrides {
                mode: Some("gather".to_string()),
                baseline: Some("feature-base".to_string()),
                store: Some(PathBuf::from("cli.json")),
            },
        )
        .expect("resolves");
        assert_eq!(config.mode, Mode::Gather);
        assert_eq!(config.baseline.as_deref(), Some("feature-base"));
        assert_eq!(config.store_path, dir.path().join("cli.json"));
    }

    #[test]
    fn file_values_apply_when_no_overrides_are_given() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(super::CONFIG_FILE),
            "mode: cache\nbaseline: main\n",
        )
        .expect("write config");

        let config = RunConfig::resolve(dir.path(), &Overrides::default()).expect("resolves");
        assert_eq!(config.mode, Mode::Cache);
        assert_eq!(config.baseline.as_deref(), Some("main"));
        assert_eq!(
            config.store_path,
            dir.path().join(super::DEFAULT_STORE_FILE)
        );
    }

    #[test]
    fn blank_baseline_counts_as_unset() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(super::CONFIG_FILE),
            "mode: skip\nbaseline: \"  \"\n",
        )
        .expect("write config");

        let err = RunConfig::resolve(dir.path(), &Overrides::default())
            .expect_err("blank baseline must not satisfy skip");
        assert!(matches!(err, ConfigError::MissingBaseline(Mode::Skip)));
    }

    #[test]
    fn nearest_config_wins_when_walking_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("workspace/member/src");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join(super::CONFIG_FILE), "mode: all\n").expect("outer");
        std::fs::write(
            dir.path().join("workspace/member").join(super::CONFIG_FILE),
            "mode: gather\n",
        )
        .expect("inner");

        let found = find_nearest_config(&nested).expect("config found");
        assert_eq!(found, dir.path().join("workspace/member").join(super::CONFIG_FILE));
        let file = load_config_file(&found).expect("parse");
        assert_eq!(file.mode, Some(Mode::Gather));
    }

    #[test]
    fn unknown_mode_in_the_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(super::CONFIG_FILE);
        std::fs::write(&path, "mode: warp\n").expect("write config");
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::InvalidMode(_))
        ));
    }
}
