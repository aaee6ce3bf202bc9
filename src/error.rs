//! Error types for table slicing.
//!
//! Every failure is terminal for the table being sliced. Errors are split into
//! two classes, see [`ErrorKind`]: problems with the input the operator supplied
//! and internal or I/O failures of the slicer itself.

use crate::columns::ParseError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for slicer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error class, decides how the error is reported and which exit code is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, reported to the operator without a trace.
    User,
    /// Internal invariant violation or I/O failure.
    Application,
}

/// Errors that can occur while slicing a table.
#[derive(Debug, Error)]
pub enum Error {
    #[error("table definition is not valid: {0}")]
    InvalidTable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("input table \"{}\" not found", .0.display())]
    InputNotFound(PathBuf),

    #[error("manifest \"{}\" not found", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("the manifest \"{}\" not found, it is required for the sliced table", .0.display())]
    ManifestRequired(PathBuf),

    #[error("the manifest \"{}\" has no columns, columns are required for the sliced table", .0.display())]
    MissingManifestColumns(PathBuf),

    #[error("invalid manifest \"{}\": {message}", .path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("unexpected directory \"{}\" in the sliced table", .0.display())]
    UnexpectedDirectory(PathBuf),

    #[error("missing header row in CSV \"{0}\"")]
    MissingHeader(String),

    #[error("the header cannot be read from CSV \"{table}\": {reason}")]
    HeaderUnavailable { table: String, reason: &'static str },

    #[error("cannot parse CSV header: {0}")]
    HeaderParse(#[source] ParseError),

    #[error("row in slice \"{slice}\" exceeds the maximum row size of {max_size} bytes")]
    RowTooLarge { slice: String, max_size: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot encode manifest \"{}\": {source}", .path.display())]
    ManifestEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("background task \"{0}\" panicked")]
    TaskPanicked(&'static str),

    #[error("cannot start gzip workers: {0}")]
    GzipWorkers(#[source] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Wraps an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTable(_)
            | Self::InvalidConfig(_)
            | Self::InputNotFound(_)
            | Self::ManifestNotFound(_)
            | Self::ManifestRequired(_)
            | Self::MissingManifestColumns(_)
            | Self::InvalidManifest { .. }
            | Self::UnexpectedDirectory(_)
            | Self::MissingHeader(_) => ErrorKind::User,
            Self::HeaderUnavailable { .. }
            | Self::HeaderParse(_)
            | Self::RowTooLarge { .. }
            | Self::Io { .. }
            | Self::ManifestEncode { .. }
            | Self::TaskPanicked(_)
            | Self::GzipWorkers(_) => ErrorKind::Application,
        }
    }

    #[must_use]
    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }

    /// Process exit code for this error: 1 for user errors, 2 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::User => 1,
            ErrorKind::Application => 2,
        }
    }
}

/// Keeps the first error of a close chain, logging any later one.
///
/// Layered readers and writers are released in sequence; a failure of an
/// earlier step takes precedence over failures of the releases after it.
pub(crate) fn keep_first<E: std::fmt::Display>(
    first: std::result::Result<(), E>,
    second: std::result::Result<(), E>,
) -> std::result::Result<(), E> {
    match (first, second) {
        (Err(first), Err(second)) => {
            tracing::warn!(error = %second, "release failed after an earlier error");
            Err(first)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}
