//! Mailing-list database
//!
//! Where bounce and unsubscribe decisions end up: addresses that keep failing
//! get their emails disabled, and unsubscribe requests are recorded.

mod sqlite;

pub use sqlite::{DisabledAddress, SqliteMailingListDatabase};

use crate::logging::ACTION_TARGET;
use crate::mail::EmailAddress;
use crate::parser::FailureStatus;
use thiserror::Error;

/// Mailing-list database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Subscriber store the sorter reports to
pub trait MailingListDatabase: Send + Sync {
    /// Stop sending to an address; returns whether anything changed
    fn disable_emails_for_address(
        &self,
        address: &EmailAddress,
        status: FailureStatus,
        full_status: &str,
    ) -> Result<bool>;

    /// Record an unsubscribe request; returns whether anything changed
    fn unsubscribe_address(&self, address: &EmailAddress) -> Result<bool>;

    /// Whether an unsubscribe request is already on record
    fn is_unsubscribed(&self, address: &EmailAddress) -> Result<bool>;
}

/// Database that only logs what it was asked to do
#[derive(Debug, Default, Clone)]
pub struct LoggingMailingListDatabase;

impl MailingListDatabase for LoggingMailingListDatabase {
    fn disable_emails_for_address(
        &self,
        address: &EmailAddress,
        status: FailureStatus,
        full_status: &str,
    ) -> Result<bool> {
        tracing::info!(
            target: ACTION_TARGET,
            address = %address,
            status = %status,
            full_status,
            "Disable emails for address"
        );
        Ok(true)
    }

    fn unsubscribe_address(&self, address: &EmailAddress) -> Result<bool> {
        tracing::info!(target: ACTION_TARGET, address = %address, "Unsubscribe address");
        Ok(true)
    }

    fn is_unsubscribed(&self, _address: &EmailAddress) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_database_reports_success() {
        let db = LoggingMailingListDatabase;
        let addr: EmailAddress = "bob@y".parse().unwrap();
        assert!(db
            .disable_emails_for_address(&addr, FailureStatus::PermanentFailure, "5.1.1")
            .unwrap());
        assert!(db.unsubscribe_address(&addr).unwrap());
        assert!(!db.is_unsubscribed(&addr).unwrap());
    }
}
