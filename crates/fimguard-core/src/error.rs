//! Error types for fimguard
//!
//! Every fatal error carries a locator (configuration key, database line or
//! filesystem path) and maps to one of the fixed process exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code: run finished, nothing changed
pub const EXIT_OK: i32 = 0;
/// Bit set in the exit code when added paths were reported
pub const EXIT_ADDED: i32 = 1;
/// Bit set in the exit code when removed paths were reported
pub const EXIT_REMOVED: i32 = 2;
/// Bit set in the exit code when changed paths were reported
pub const EXIT_CHANGED: i32 = 4;
pub const EXIT_WRITE_ERROR: i32 = 14;
pub const EXIT_INVALID_ARGUMENT: i32 = 15;
pub const EXIT_CONFIG_ERROR: i32 = 17;
pub const EXIT_IO_ERROR: i32 = 18;
pub const EXIT_VERSION_MISMATCH: i32 = 19;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error at '{key}': {message}")]
    Config { key: String, message: String },

    #[error("invalid database configuration: {0}")]
    InvalidDatabases(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid limit expression '{pattern}': {message}")]
    InvalidLimit { pattern: String, message: String },

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("group '{0}' is already defined")]
    DuplicateGroup(String),

    #[error("group table is frozen, cannot define '{0}'")]
    GroupsFrozen(String),

    #[error("invalid rule at {location}: {message}")]
    InvalidRule { location: String, message: String },

    #[error("database not found: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("{}:{line}: {message}", .location.display())]
    Format {
        location: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}:{line}: unexpected end of database (missing completion marker)", .location.display())]
    UnexpectedEof { location: PathBuf, line: usize },

    #[error("{}: database format version {found} is not supported (expected {expected})", .location.display())]
    VersionMismatch {
        location: PathBuf,
        found: String,
        expected: u32,
    },

    #[error("failed to write database {}: {source}", .location.display())]
    Write {
        location: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GuardError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        GuardError::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GuardError::Io {
            path: path.into(),
            source,
        }
    }

    /// Fixed process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. }
            | Self::UnknownGroup(_)
            | Self::DuplicateGroup(_)
            | Self::GroupsFrozen(_)
            | Self::InvalidRule { .. } => EXIT_CONFIG_ERROR,
            Self::InvalidDatabases(_) | Self::InvalidAction(_) | Self::InvalidLimit { .. } => {
                EXIT_INVALID_ARGUMENT
            }
            Self::DatabaseNotFound(_)
            | Self::Format { .. }
            | Self::UnexpectedEof { .. }
            | Self::Io { .. } => EXIT_IO_ERROR,
            Self::VersionMismatch { .. } => EXIT_VERSION_MISMATCH,
            Self::Write { .. } => EXIT_WRITE_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_fixed() {
        assert_eq!(GuardError::UnknownGroup("Q".into()).exit_code(), 17);
        assert_eq!(GuardError::InvalidDatabases("same".into()).exit_code(), 15);
        assert_eq!(
            GuardError::UnexpectedEof {
                location: PathBuf::from("/db"),
                line: 3
            }
            .exit_code(),
            18
        );
        let e = GuardError::VersionMismatch {
            location: PathBuf::from("/db"),
            found: "9".into(),
            expected: 1,
        };
        assert_eq!(e.exit_code(), 19);
        assert!(e.to_string().contains("/db"));
    }

    #[test]
    fn format_error_carries_line_number() {
        let e = GuardError::Format {
            location: PathBuf::from("/var/lib/db"),
            line: 42,
            message: "expected 4 fields, found 3".into(),
        };
        assert_eq!(e.to_string(), "/var/lib/db:42: expected 4 fields, found 3");
    }
}
