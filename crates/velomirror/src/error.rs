//! Error types for velomirror.
//!
//! Sync-path errors (remote reads, writes and subscriptions) are caught and
//! logged where they happen; they never reach callers of the mutation API.
//! The remaining kinds surface from constructors such as
//! [`SqliteStore::open`](crate::remote::SqliteStore::open) and
//! [`Config::load`](crate::Config::load).

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for velomirror operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Remote Store Errors ===
    /// Reading a remote document failed.
    #[error("failed to read {document}: {message}")]
    RemoteRead {
        /// Path of the document, e.g. `users/ada@example.com`.
        document: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Writing a remote document failed.
    #[error("failed to write {document}: {message}")]
    RemoteWrite {
        /// Path of the document.
        document: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Establishing or receiving on a subscription failed.
    #[error("subscription to {document} failed: {message}")]
    Subscription {
        /// Path of the subscribed document.
        document: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The channel target has no remote record.
    #[error("document {document} does not exist")]
    MissingDocument {
        /// Path of the missing document.
        document: String,
    },

    /// An operation needed a signed-in owner.
    #[error("no owner is signed in")]
    NotSignedIn,

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for velomirror operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a remote read error.
    #[must_use]
    pub fn remote_read(document: impl ToString, message: impl Into<String>) -> Self {
        Self::RemoteRead {
            document: document.to_string(),
            message: message.into(),
        }
    }

    /// Create a remote write error.
    #[must_use]
    pub fn remote_write(document: impl ToString, message: impl Into<String>) -> Self {
        Self::RemoteWrite {
            document: document.to_string(),
            message: message.into(),
        }
    }

    /// Create a subscription error.
    #[must_use]
    pub fn subscription(document: impl ToString, message: impl Into<String>) -> Self {
        Self::Subscription {
            document: document.to_string(),
            message: message.into(),
        }
    }

    /// Create a missing document error.
    #[must_use]
    pub fn missing_document(document: impl ToString) -> Self {
        Self::MissingDocument {
            document: document.to_string(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the target document has no record yet.
    #[must_use]
    pub fn is_missing_document(&self) -> bool {
        matches!(self, Self::MissingDocument { .. })
    }

    /// Check if this error came from talking to the document store.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteRead { .. }
                | Self::RemoteWrite { .. }
                | Self::Subscription { .. }
                | Self::MissingDocument { .. }
        )
    }
}
