use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = ".sift-tmp";

/// Replace `path` with `bytes` as a single all-or-nothing step: the content
/// goes to a sibling temp file first and only a successful rename makes it
/// visible, so a crash mid-write cannot leave a half-written store.
pub fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = sibling_tmp_path(path)?;
    let outcome = write_then_rename(&tmp, path, bytes);
    if outcome.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    outcome
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    if fs::rename(tmp, path).is_err() {
        // Windows refuses to rename over an existing file.
        fs::remove_file(path)?;
        fs::rename(tmp, path)?;
    }
    sync_parent(path)
}

fn sibling_tmp_path(path: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no filename"))?;
    Ok(path.with_file_name(format!(".{name}.{}{TMP_SUFFIX}", std::process::id())))
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{TMP_SUFFIX, replace_file};
    use std::fs;

    #[test]
    fn creates_the_target_with_exact_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("coverage.json");

        replace_file(&path, br#"{"version":1}"#).expect("replace");
        assert_eq!(fs::read_to_string(&path).expect("read"), r#"{"version":1}"#);
    }

    #[test]
    fn overwrites_an_existing_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("coverage.json");
        fs::write(&path, "stale").expect("seed");

        replace_file(&path, b"fresh").expect("replace");
        assert_eq!(fs::read_to_string(&path).expect("read"), "fresh");
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("coverage.json");

        replace_file(&path, b"one").expect("first");
        replace_file(&path, b"two").expect("second");

        let stray = fs::read_dir(dir.path())
            .expect("list dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TMP_SUFFIX))
            .collect::<Vec<_>>();
        assert!(stray.is_empty(), "stray temp files: {stray:?}");
    }
}
