//! Error types for mailsort
//!
//! Each concern defines its own error enum (mailbox sessions, stats
//! repositories, the mailing-list database); they all convert into
//! [`MailSortError`] so the runner and CLI can propagate with `?`.

use crate::database::DatabaseError;
use crate::mailbox::MailboxError;
use crate::stats::RepositoryError;
use thiserror::Error;

/// Result type alias for mailsort operations
pub type Result<T> = std::result::Result<T, MailSortError>;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum MailSortError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mailbox session errors
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// Address or mailing stats repository errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Mailing-list database errors
    #[error("Mailing list database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLite errors raised outside a repository
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Outbound forwarding failed
    #[error("Forwarding error: {0}")]
    Forward(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors from pluggable collaborators
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl MailSortError {
    /// Whether this error aborts the whole run rather than a single message
    ///
    /// Only failing to open the mailbox session (or select a box) is fatal;
    /// everything else is contained at the per-message boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MailSortError::Config(_)
                | MailSortError::Mailbox(MailboxError::Connect(_))
                | MailSortError::Mailbox(MailboxError::NoSuchBox(_))
        )
    }
}
