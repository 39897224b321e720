use std::io;
use std::path::PathBuf;
use std::process::Command;

#[derive(Debug)]
pub enum GitError {
    Spawn(io::Error),
    Failed { args: Vec<String>, stderr: String },
    Encoding(std::string::FromUtf8Error),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "unable to run git: {err}"),
            Self::Failed { args, stderr } => {
                write!(f, "`git {}` failed: {}", args.join(" "), stderr.trim())
            }
            Self::Encoding(err) => write!(f, "git produced non-UTF-8 output: {err}"),
        }
    }
}

impl std::error::Error for GitError {}

fn cmd_output(args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(GitError::Spawn)?;
    if !output.status.success() {
        return Err(GitError::Failed {
            args: args.iter().map(ToString::to_string).collect(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    String::from_utf8(output.stdout).map_err(GitError::Encoding)
}

/// Root of the repository enclosing the current directory.
pub fn toplevel() -> Result<PathBuf, GitError> {
    let out = cmd_output(&["rev-parse", "--show-toplevel"])?;
    Ok(PathBuf::from(out.trim()))
}

/// Unified diff of the working tree against the baseline revision.
pub fn diff_text(baseline: &str) -> Result<String, GitError> {
    cmd_output(&["diff", baseline])
}
