//! SQLite mailing-list database

use super::{DatabaseError, MailingListDatabase, Result};
use crate::mail::EmailAddress;
use crate::parser::FailureStatus;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Disabled and unsubscribed addresses in SQLite
pub struct SqliteMailingListDatabase {
    conn: Mutex<Connection>,
}

/// Why and when an address was disabled
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DisabledAddress {
    pub status: String,
    pub full_status: String,
    pub disabled_at: String,
}

impl SqliteMailingListDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DatabaseError::Backend(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS disabled_addresses (
                email TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                full_status TEXT NOT NULL,
                disabled_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS unsubscribed (
                email TEXT PRIMARY KEY,
                unsubscribed_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::Backend("mailing list connection poisoned".to_string()))
    }

    /// Disable record for an address, if any
    pub fn disabled(&self, address: &EmailAddress) -> Result<Option<DisabledAddress>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT status, full_status, disabled_at FROM disabled_addresses WHERE email = ?1",
                params![address.as_str()],
                |row| {
                    Ok(DisabledAddress {
                        status: row.get(0)?,
                        full_status: row.get(1)?,
                        disabled_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }
}

impl MailingListDatabase for SqliteMailingListDatabase {
    fn disable_emails_for_address(
        &self,
        address: &EmailAddress,
        status: FailureStatus,
        full_status: &str,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO disabled_addresses (email, status, full_status, disabled_at) VALUES (?1, ?2, ?3, ?4)",
            params![address.as_str(), status.as_str(), full_status, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn unsubscribe_address(&self, address: &EmailAddress) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO unsubscribed (email, unsubscribed_at) VALUES (?1, ?2)",
            params![address.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn is_unsubscribed(&self, address: &EmailAddress) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM unsubscribed WHERE email = ?1",
                params![address.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_is_recorded_once() {
        let db = SqliteMailingListDatabase::open_in_memory().unwrap();
        let addr: EmailAddress = "bob@y".parse().unwrap();

        assert!(db.disabled(&addr).unwrap().is_none());
        assert!(db
            .disable_emails_for_address(&addr, FailureStatus::PermanentFailure, "permanent_failure 5.1.1")
            .unwrap());
        assert!(!db
            .disable_emails_for_address(&addr, FailureStatus::PermanentFailure, "again")
            .unwrap());

        let record = db.disabled(&addr).unwrap().unwrap();
        assert_eq!(record.status, "permanent_failure");
        assert_eq!(record.full_status, "permanent_failure 5.1.1");
    }

    #[test]
    fn test_unsubscribe() {
        let db = SqliteMailingListDatabase::open_in_memory().unwrap();
        let addr: EmailAddress = "reader@example.org".parse().unwrap();

        assert!(!db.is_unsubscribed(&addr).unwrap());
        assert!(db.unsubscribe_address(&addr).unwrap());
        assert!(!db.unsubscribe_address(&addr).unwrap());
        assert!(db.is_unsubscribed(&addr).unwrap());
    }
}
