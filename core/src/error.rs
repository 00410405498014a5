//! Error type shared by every stage of the spoofing pipeline.
//!
//! Errors are grouped by how the trial harness reacts to them: configuration and
//! reference-data problems abort a run before any trial starts, while format, I/O,
//! external-process and evaluation errors are scoped to the trial (or message) that
//! raised them.
use std::io;
use std::path::PathBuf;

/// Errors emitted by the spoofing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpoofError {
    /// Missing or malformed configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference trajectory is missing required fields or is empty.
    #[error("Reference data error in '{path}': {reason}")]
    Data { path: PathBuf, reason: String },

    /// A sensor payload or log record does not have the expected layout.
    #[error("Format error: {0}")]
    Format(String),

    /// File system failure with the path that caused it.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// External SLAM process could not be started or exited with a failure status.
    #[error("External process '{command}' failed: {reason}")]
    ExternalProcess { command: String, reason: String },

    /// Trajectory evaluation could not produce a metric.
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl SpoofError {
    /// Wrap an `io::Error` together with the path it occurred on.
    pub fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        SpoofError::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for errors that must stop a run before (or instead of) any trial.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SpoofError::Config(_) | SpoofError::Data { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpoofError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(SpoofError::Config("missing key".into()).is_fatal());
        assert!(
            SpoofError::Data {
                path: PathBuf::from("ref.csv"),
                reason: "no x column".into()
            }
            .is_fatal()
        );
        assert!(!SpoofError::Format("bad stride".into()).is_fatal());
        assert!(
            !SpoofError::ExternalProcess {
                command: "roslaunch".into(),
                reason: "exit status 1".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn io_error_mentions_path() {
        let err = SpoofError::io(
            "/tmp/out.bag",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out.bag"));
        assert!(msg.contains("denied"));
    }
}
