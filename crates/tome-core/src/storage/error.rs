//! Storage error handling
//!
//! Typed errors for record-store operations, with descriptive messages and
//! recovery suggestions. A missing record is not an error: lookups return
//! `Ok(None)` and update/delete return `Ok(false)`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A header block or table file could not be parsed
    #[error("Invalid record format in '{path}': {details}")]
    InvalidFormat { path: PathBuf, details: String },

    /// A record could not be encoded
    #[error("Failed to encode record for '{path}': {details}")]
    Encode { path: PathBuf, details: String },

    /// The book has no BookMeta record yet
    #[error("Book at '{path}' is not initialized")]
    NotInitialized { path: PathBuf },

    /// A name that must be unique within a book is already taken
    #[error("A {kind} named '{name}' already exists in this book")]
    DuplicateName { kind: &'static str, name: String },

    /// A caller-supplied id is already in use
    #[error("A {kind} with id '{id}' already exists in this book")]
    DuplicateId { kind: &'static str, id: String },

    /// A named field could not be set on a record
    #[error("Cannot set field '{field}': {details}")]
    InvalidField { field: String, details: String },

    /// File not found (when expected to exist)
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => StoreError::NotFound { path },
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Same classification as `from_io`, but unclassified failures are reads
    pub fn from_read(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
                Self::from_io(error, path)
            }
            _ => StoreError::ReadError {
                path,
                source: error,
            },
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DiskFull { .. } => Some("Free up disk space and try again."),
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions for the vault.")
            }
            StoreError::InvalidFormat { .. } => {
                Some("Open the file in an editor and repair the header block, or restore it from a backup.")
            }
            StoreError::NotInitialized { .. } => {
                Some("Initialize the book first (`tome init <book>`).")
            }
            StoreError::DuplicateName { .. } => {
                Some("Pick a different name or update the existing record instead.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_not_found_classification() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StoreError::from_io(io_err, PathBuf::from("/missing/file"));

        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StoreError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StoreError::DiskFull { .. }));
    }

    #[test]
    fn test_read_classification() {
        let io_err = io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8");
        let err = StoreError::from_read(io_err, PathBuf::from("/book/_tome/characters.md"));

        assert!(matches!(err, StoreError::ReadError { .. }));
        assert!(err.recovery_suggestion().is_none());
    }

    #[test]
    fn test_duplicate_name_display() {
        let err = StoreError::DuplicateName {
            kind: "character",
            name: "Mira".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("character"));
        assert!(msg.contains("Mira"));
        assert!(err.recovery_suggestion().is_some());
    }
}
