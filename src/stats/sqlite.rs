//! SQLite statistics store
//!
//! Implements both [`AddressStatsRepository`] and [`MailingRepository`] on one
//! database file. Read-modify-write updates run inside `BEGIN IMMEDIATE`
//! transactions, which take SQLite's write lock before reading, so two
//! processes incrementing the same counter serialize instead of losing an
//! update.

use super::{
    AddressStats, AddressStatsRepository, Mailing, MailingId, MailingRepository, RepositoryError,
    Result,
};
use crate::mail::EmailAddress;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long to wait for another process holding the write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-backed statistics repositories
pub struct SqliteStatsStore {
    conn: Mutex<Connection>,
}

impl SqliteStatsStore {
    /// Open or create a statistics database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Backend(format!("{}: {}", parent.display(), e)))?;
        }

        tracing::info!(path = %path.display(), "Opening statistics database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// In-memory database, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS address_stats (
                email TEXT PRIMARY KEY,
                last_status TEXT NOT NULL,
                last_status_date TEXT NOT NULL,
                spam INTEGER NOT NULL DEFAULT 0,
                diagnostic_code TEXT NOT NULL DEFAULT '',
                temporary_failure_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS mailings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id TEXT NOT NULL UNIQUE,
                name TEXT,
                undelivered_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_address_stats_status ON address_stats(last_status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Backend("statistics connection poisoned".to_string()))
    }

    /// Register a mailing so bounces carrying its List-Id are counted
    pub fn register_mailing(&self, list_id: &str, name: Option<&str>) -> Result<Mailing> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO mailings (list_id, name, undelivered_count, created_at) VALUES (?1, ?2, 0, ?3)",
            params![list_id, name, Utc::now().to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepositoryError::AlreadyExists(list_id.to_string())
            }
            other => other.into(),
        })?;

        Ok(Mailing {
            id: conn.last_insert_rowid(),
            list_id: list_id.to_string(),
            name: name.map(str::to_string),
            undelivered_count: 0,
        })
    }

    /// All registered mailings
    pub fn mailings(&self) -> Result<Vec<Mailing>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, list_id, name, undelivered_count FROM mailings ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_mailing)?;

        let mut mailings = Vec::new();
        for row in rows {
            mailings.push(row?);
        }
        Ok(mailings)
    }

    /// Fetch a mailing by its id
    pub fn mailing(&self, id: MailingId) -> Result<Option<Mailing>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, list_id, name, undelivered_count FROM mailings WHERE id = ?1",
                params![id],
                row_to_mailing,
            )
            .optional()?)
    }
}

fn row_to_mailing(row: &Row) -> rusqlite::Result<Mailing> {
    Ok(Mailing {
        id: row.get(0)?,
        list_id: row.get(1)?,
        name: row.get(2)?,
        undelivered_count: counter(row, 3)?,
    })
}

fn row_to_address_stats(row: &Row) -> rusqlite::Result<AddressStats> {
    let email: String = row.get(0)?;
    let email = EmailAddress::new(&email)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let date: String = row.get(2)?;
    let last_status_date = DateTime::parse_from_rfc3339(&date)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(AddressStats {
        email,
        last_status: row.get(1)?,
        last_status_date,
        spam: row.get(3)?,
        diagnostic_code: row.get(4)?,
        temporary_failure_count: counter(row, 5)?,
    })
}

/// Read a counter column, rejecting values outside the target type
fn counter<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: TryFrom<i64>,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let value: i64 = row.get(idx)?;
    T::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

const SELECT_ADDRESS: &str = "SELECT email, last_status, last_status_date, spam, diagnostic_code, temporary_failure_count FROM address_stats WHERE email = ?1";

impl AddressStatsRepository for SqliteStatsStore {
    fn get_by_email(&self, email: &EmailAddress) -> Result<Option<AddressStats>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(SELECT_ADDRESS, params![email.as_str()], row_to_address_stats)
            .optional()?)
    }

    fn update_in_transaction(
        &self,
        email: &EmailAddress,
        mutator: &mut dyn FnMut(&mut AddressStats),
    ) -> Result<Option<AddressStats>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut stats) = tx
            .query_row(SELECT_ADDRESS, params![email.as_str()], row_to_address_stats)
            .optional()?
        else {
            return Ok(None);
        };

        mutator(&mut stats);

        tx.execute(
            r#"
            UPDATE address_stats
            SET last_status = ?2, last_status_date = ?3, spam = ?4,
                diagnostic_code = ?5, temporary_failure_count = ?6
            WHERE email = ?1
            "#,
            params![
                email.as_str(),
                stats.last_status,
                stats.last_status_date.to_rfc3339(),
                stats.spam,
                stats.diagnostic_code,
                stats.temporary_failure_count as i64,
            ],
        )?;
        tx.commit()?;

        Ok(Some(stats))
    }

    fn create(&self, record: AddressStats) -> Result<AddressStats> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO address_stats
            (email, last_status, last_status_date, spam, diagnostic_code, temporary_failure_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.email.as_str(),
                record.last_status,
                record.last_status_date.to_rfc3339(),
                record.spam,
                record.diagnostic_code,
                record.temporary_failure_count as i64,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepositoryError::AlreadyExists(record.email.to_string())
            }
            other => other.into(),
        })?;

        Ok(record)
    }
}

impl MailingRepository for SqliteStatsStore {
    fn get_by_list_id(&self, list_id: &str) -> Result<Option<Mailing>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, list_id, name, undelivered_count FROM mailings WHERE list_id = ?1",
                params![list_id],
                row_to_mailing,
            )
            .optional()?)
    }

    fn update_in_transaction(
        &self,
        id: MailingId,
        mutator: &mut dyn FnMut(&mut Mailing),
    ) -> Result<Option<Mailing>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut mailing) = tx
            .query_row(
                "SELECT id, list_id, name, undelivered_count FROM mailings WHERE id = ?1",
                params![id],
                row_to_mailing,
            )
            .optional()?
        else {
            return Ok(None);
        };

        mutator(&mut mailing);
        let undelivered_count = i64::try_from(mailing.undelivered_count)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        tx.execute(
            "UPDATE mailings SET name = ?2, undelivered_count = ?3 WHERE id = ?1",
            params![id, mailing.name, undelivered_count],
        )?;
        tx.commit()?;

        Ok(Some(mailing))
    }
}
