//! Error type shared by every devkit component.
//!
//! Engine and subprocess failures are never retried. They carry the failing
//! command line and its exit code so the CLI can mirror the code on exit.

use std::path::PathBuf;

use thiserror::Error;


pub type Result<T, E = Error> = std::result::Result<T, E>;


#[derive(Debug, Error)]
pub enum Error {
    /// `devkit.yaml` (or another project file) failed validation.
    #[error("invalid {file}: {message}")]
    ConfigInvalid { file: String, message: String },

    /// A file the command needs is not present in the project.
    #[error("file {file} does not exist. {hint}")]
    MissingProjectFile { file: String, hint: String },

    /// `init` refuses to overwrite an existing project file.
    #[error("aborting since {file} already exists")]
    ProjectExists { file: String },

    /// An external command exited non-zero.
    #[error("following command exited with code {code}:\n\n  {command}")]
    EngineInvocationFailed { command: String, code: i32 },

    /// `processes stop` was asked for but no pid file exists.
    #[error("no processes running")]
    ProcessNotRunning,

    /// The pid file names a process that no longer exists.
    #[error("process with PID {0} not found")]
    ProcessNotFound(u32),

    /// The project declares no process supervisor content.
    #[error("no 'processes' option defined")]
    NoProcesses,

    #[error("timed out acquiring lock {} after {timeout_ms}ms", path.display())]
    LockTimeout { path: PathBuf, timeout_ms: u64 },

    /// Tests that failed under `--keep-going`, in run order.
    #[error("Failed: {}", .0.join(", "))]
    TestFailure(Vec<String>),

    /// SIGINT arrived while a child was running.
    #[error("interrupted")]
    Interrupted,

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON from engine: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}


impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::File { path: path.into(), source }
    }

    /// Process exit status the CLI should use for this error.
    ///
    /// Engine failures mirror the engine's own code, keep-going test
    /// failures exit 2, interrupts use the conventional 128 + SIGINT.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::EngineInvocationFailed { code, .. } if *code != 0 => *code,
            Error::TestFailure(_) => 2,
            Error::Interrupted => 130,
            _ => 1,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failure_mirrors_exit_code() {
        let err = Error::EngineInvocationFailed {
            command: "nix build .#ci".into(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("nix build .#ci"));
        assert!(err.to_string().contains("code 3"));
    }

    #[test]
    fn other_errors_exit_one() {
        assert_eq!(Error::ProcessNotRunning.exit_code(), 1);
        assert_eq!(Error::ProcessNotFound(12).exit_code(), 1);
    }

    #[test]
    fn keep_going_failures_exit_two() {
        let err = Error::TestFailure(vec!["a".into(), "c".into()]);
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "Failed: a, c");
    }

    #[test]
    fn interrupt_exits_130() {
        assert_eq!(Error::Interrupted.exit_code(), 130);
        assert!(Error::Interrupted.is_interrupt());
    }

    #[test]
    fn lock_timeout_names_path() {
        let err = Error::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            timeout_ms: 10_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x.lock"));
        assert!(msg.contains("10000ms"));
    }
}
