//! Delivery statistics
//!
//! Per-address and per-mailing failure counters, the repository contracts
//! they are stored behind, and the [`MailingStatsTracker`] that applies a
//! parsed bounce to them.
//!
//! # Transactional updates
//!
//! Both repositories expose `update_in_transaction(key, mutator)`: read the
//! record, run the mutator on it and write it back as one atomic unit, so
//! concurrent sorter runs never lose an increment. A missing record yields
//! `Ok(None)` and the mutator is not called.

mod sqlite;
mod tracker;

pub use sqlite::SqliteStatsStore;
pub use tracker::{ListIdCache, MailingStatsTracker, StatsAction};

use crate::mail::EmailAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Identifier of a mailing (one sent campaign or list issue)
pub type MailingId = i64;

/// Failure statistics for one recipient address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStats {
    pub email: EmailAddress,
    /// Last reported DSN status code
    pub last_status: String,
    pub last_status_date: DateTime<Utc>,
    pub spam: bool,
    pub diagnostic_code: String,
    pub temporary_failure_count: u32,
}

/// Delivery statistics for one mailing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailing {
    pub id: MailingId,
    /// Normalized List-Id the mailing was sent with
    pub list_id: String,
    pub name: Option<String>,
    pub undelivered_count: u64,
}

/// Storage for per-mailing statistics
pub trait MailingRepository: Send + Sync {
    /// Find the mailing sent with a List-Id
    fn get_by_list_id(&self, list_id: &str) -> Result<Option<Mailing>>;

    /// Atomically read, mutate and store a mailing
    fn update_in_transaction(
        &self,
        id: MailingId,
        mutator: &mut dyn FnMut(&mut Mailing),
    ) -> Result<Option<Mailing>>;
}

/// Storage for per-address statistics
pub trait AddressStatsRepository: Send + Sync {
    fn get_by_email(&self, email: &EmailAddress) -> Result<Option<AddressStats>>;

    /// Atomically read, mutate and store an address record
    fn update_in_transaction(
        &self,
        email: &EmailAddress,
        mutator: &mut dyn FnMut(&mut AddressStats),
    ) -> Result<Option<AddressStats>>;

    /// Insert a new record; fails with [`RepositoryError::AlreadyExists`]
    /// if the address is already known
    fn create(&self, record: AddressStats) -> Result<AddressStats>;
}
