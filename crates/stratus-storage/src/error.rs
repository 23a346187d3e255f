// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Storage error type
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// The database file could not be opened or initialized
    #[error("Cannot open record store: {message}")]
    #[diagnostic(
        code(stratus::storage::open),
        help("Check that the data directory is writable and that no other stratus process is using it")
    )]
    Open {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A read or write against an open database failed
    #[error("Storage backend failure: {message}")]
    #[diagnostic(
        code(stratus::storage::backend),
        help("The disk may be full or the database damaged. The in-memory audit trail is unaffected")
    )]
    Backend {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Records are append-only
    #[error("Record already exists: {key}")]
    #[diagnostic(
        code(stratus::storage::record_exists),
        help("Two writers appear to share one data directory. Run a single engine per directory")
    )]
    RecordExists {
        #[allow(unused)]
        key: String,
    },

    /// A record could not be encoded, or a stored record could not be decoded
    #[error("Malformed record: {message}")]
    #[diagnostic(
        code(stratus::storage::malformed_record),
        help("The record may predate a format change. Move the data directory aside to start a fresh audit trail")
    )]
    Malformed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn open(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Open {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn backend(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn record_exists(key: &[u8]) -> Self {
        Self::RecordExists {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::open(err.to_string(), err)
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::backend(format!("transaction: {}", err), err)
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::backend(format!("table: {}", err), err)
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::backend(err.to_string(), err)
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::backend(format!("commit: {}", err), err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Malformed {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
