//! Durable issuance ledger backed by `SQLite`.
//!
//! Every successful delivery appends one immutable row to the
//! `issued_configs` table: who received which artifact, when, and through
//! which path. Rows are removed only by an explicit administrator delete.
//!
//! # Schema
//!
//! `issued_configs` columns: `id` (autoincrement primary key), `user_id`,
//! `username` (nullable), `full_name`, `organization`, `config_file`,
//! `issue_time`, `issue_kind`. The `username` and `issue_kind` columns were
//! added across versions; [`IssuanceLedger::open`] adds them with safe
//! defaults when opening an older database instead of failing.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::{error, info};

use crate::gateway::UserId;

/// Timestamp format stored in the `issue_time` column and used for
/// user-facing times.
pub const ISSUE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Classification of how an artifact was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Reviewed path: administrator approved the request.
    Standard,
    /// Unreviewed fast issue to the invoker.
    Fast,
    /// Forced issue by an administrator to a user resolved by handle.
    AdminForced,
}

impl IssueKind {
    /// Stable string stored in the `issue_kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Fast => "fast",
            Self::AdminForced => "admin_forced",
        }
    }

    /// Parses a stored kind. Unknown values read back as [`Self::Standard`]
    /// so rows written by newer versions stay readable.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "fast" => Self::Fast,
            "admin_forced" => Self::AdminForced,
            _ => Self::Standard,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for one ledger append.
#[derive(Debug, Clone)]
pub struct NewIssuance<'a> {
    /// Recipient of the artifact.
    pub user_id: UserId,
    /// Recipient's public handle at issuance time, if known.
    pub username: Option<&'a str>,
    /// Collected full name.
    pub full_name: &'a str,
    /// Collected organization.
    pub organization: &'a str,
    /// Delivered artifact filename.
    pub config_file: &'a str,
    /// How the artifact was delivered.
    pub kind: IssueKind,
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRecord {
    /// Surrogate ID, unique and strictly increasing in insertion order.
    pub id: i64,
    /// Recipient of the artifact.
    pub user_id: UserId,
    /// Recipient's public handle at issuance time, if known.
    pub username: Option<String>,
    /// Collected full name.
    pub full_name: String,
    /// Collected organization.
    pub organization: String,
    /// Delivered artifact filename.
    pub config_file: String,
    /// Wall-clock issuance time, `%Y-%m-%d %H:%M:%S`.
    pub issue_time: String,
    /// How the artifact was delivered.
    pub kind: IssueKind,
}

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying database failure.
    #[error("ledger database failure: {0}")]
    Database(#[from] rusqlite::Error),

    /// The connection lock was poisoned by a panicking thread.
    #[error("ledger connection lock poisoned")]
    LockPoisoned,
}

/// Durable, ordered record of every issuance.
#[derive(Debug)]
pub struct IssuanceLedger {
    conn: Mutex<Connection>,
}

impl IssuanceLedger {
    /// Opens (creating if needed) the ledger database at `path` and brings
    /// the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] when the database cannot be opened
    /// or migrated.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory ledger. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS issued_configs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id INTEGER NOT NULL,
                 username TEXT,
                 full_name TEXT NOT NULL,
                 organization TEXT NOT NULL,
                 config_file TEXT NOT NULL,
                 issue_time TEXT NOT NULL,
                 issue_kind TEXT NOT NULL DEFAULT 'standard'
             )",
            [],
        )?;
        Self::ensure_column(conn, "username", "username TEXT")?;
        Self::ensure_column(
            conn,
            "issue_kind",
            "issue_kind TEXT NOT NULL DEFAULT 'standard'",
        )?;
        Ok(())
    }

    /// Adds a column that older database versions lack. Forward-compatible
    /// by policy: missing columns are added with safe defaults, never
    /// treated as a startup error.
    fn ensure_column(conn: &Connection, name: &str, definition: &str) -> rusqlite::Result<()> {
        let present: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM pragma_table_info('issued_configs') WHERE name = ?1
            )",
            params![name],
            |row| row.get(0),
        )?;
        if !present {
            conn.execute(
                &format!("ALTER TABLE issued_configs ADD COLUMN {definition}"),
                [],
            )?;
            info!(column = name, "added missing ledger column");
        }
        Ok(())
    }

    /// Appends one issuance row and returns its surrogate ID. The timestamp
    /// is taken from the wall clock at insertion, never from the caller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the insert fails; the failure is also
    /// logged so the caller can proceed best-effort.
    pub fn record(&self, issuance: &NewIssuance<'_>) -> Result<i64, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let issue_time = Utc::now().format(ISSUE_TIME_FORMAT).to_string();
        let result = conn.execute(
            "INSERT INTO issued_configs
                 (user_id, username, full_name, organization, config_file, issue_time, issue_kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                issuance.user_id.0,
                issuance.username,
                issuance.full_name,
                issuance.organization,
                issuance.config_file,
                issue_time,
                issuance.kind.as_str(),
            ],
        );
        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                info!(
                    record_id = id,
                    user_id = issuance.user_id.0,
                    artifact = issuance.config_file,
                    kind = %issuance.kind,
                    "issuance recorded"
                );
                Ok(id)
            },
            Err(e) => {
                error!(
                    user_id = issuance.user_id.0,
                    artifact = issuance.config_file,
                    "failed to record issuance: {e}"
                );
                Err(LedgerError::Database(e))
            },
        }
    }

    /// Returns one page of issuance records, newest issuance time first.
    /// Ties on `issue_time` break by descending ID so paging stays stable.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the query fails.
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<IssuanceRecord>, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, username, full_name, organization,
                    config_file, issue_time, issue_kind
             FROM issued_configs
             ORDER BY issue_time DESC, id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], Self::row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Total number of ledger rows.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the query fails.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM issued_configs", [], |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Point lookup by surrogate ID.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the query fails.
    pub fn get_by_id(&self, id: i64) -> Result<Option<IssuanceRecord>, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let record = conn
            .query_row(
                "SELECT id, user_id, username, full_name, organization,
                        config_file, issue_time, issue_kind
                 FROM issued_configs WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Deletes a row by surrogate ID. Returns `false` when no such row
    /// exists. Irreversible; never restores the artifact to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the delete fails.
    pub fn delete_by_id(&self, id: i64) -> Result<bool, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let deleted = conn.execute("DELETE FROM issued_configs WHERE id = ?1", params![id])?;
        if deleted > 0 {
            info!(record_id = id, "ledger record deleted");
        }
        Ok(deleted > 0)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssuanceRecord> {
        let kind: String = row.get(7)?;
        Ok(IssuanceRecord {
            id: row.get(0)?,
            user_id: UserId(row.get(1)?),
            username: row.get(2)?,
            full_name: row.get(3)?,
            organization: row.get(4)?,
            config_file: row.get(5)?,
            issue_time: row.get(6)?,
            kind: IssueKind::parse(&kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn issuance<'a>(user: i64, file: &'a str, kind: IssueKind) -> NewIssuance<'a> {
        NewIssuance {
            user_id: UserId(user),
            username: None,
            full_name: "Ivan Petrov",
            organization: "Acme",
            config_file: file,
            kind,
        }
    }

    #[test]
    fn test_record_increments_count_and_ids() {
        let ledger = IssuanceLedger::open_in_memory().unwrap();
        assert_eq!(ledger.count().unwrap(), 0);

        let first = ledger
            .record(&issuance(1, "a.conf", IssueKind::Standard))
            .unwrap();
        let second = ledger
            .record(&issuance(2, "b.conf", IssueKind::Fast))
            .unwrap();

        assert!(second > first);
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_list_orders_newest_first_with_stable_ties() {
        let ledger = IssuanceLedger::open_in_memory().unwrap();
        for i in 0..5 {
            ledger
                .record(&issuance(i, &format!("{i}.conf"), IssueKind::Standard))
                .unwrap();
        }

        // All rows share the same wall-clock second in this test, so the
        // ID tie-break must keep the order deterministic.
        let page = ledger.list(5, 0).unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted);

        let second_page = ledger.list(2, 2).unwrap();
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].id, ids[2]);
    }

    #[test]
    fn test_get_by_id_round_trips_fields() {
        let ledger = IssuanceLedger::open_in_memory().unwrap();
        let id = ledger
            .record(&NewIssuance {
                user_id: UserId(7),
                username: Some("ivan"),
                full_name: "Ivan Petrov",
                organization: "Acme",
                config_file: "a.conf",
                kind: IssueKind::AdminForced,
            })
            .unwrap();

        let record = ledger.get_by_id(id).unwrap().unwrap();
        assert_eq!(record.user_id, UserId(7));
        assert_eq!(record.username.as_deref(), Some("ivan"));
        assert_eq!(record.config_file, "a.conf");
        assert_eq!(record.kind, IssueKind::AdminForced);
    }

    #[test]
    fn test_delete_missing_id_reports_not_found() {
        let ledger = IssuanceLedger::open_in_memory().unwrap();
        ledger
            .record(&issuance(1, "a.conf", IssueKind::Standard))
            .unwrap();

        assert!(!ledger.delete_by_id(9999).unwrap());
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[test]
    fn test_delete_by_id_removes_row() {
        let ledger = IssuanceLedger::open_in_memory().unwrap();
        let id = ledger
            .record(&issuance(1, "a.conf", IssueKind::Standard))
            .unwrap();

        assert!(ledger.delete_by_id(id).unwrap());
        assert_eq!(ledger.count().unwrap(), 0);
        assert!(ledger.get_by_id(id).unwrap().is_none());
    }

    #[test]
    fn test_open_migrates_v1_schema() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("issued.db");

        // First-generation schema: no username, no issue_kind.
        let conn = Connection::open(&db_path).unwrap();
        conn.execute(
            "CREATE TABLE issued_configs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id INTEGER NOT NULL,
                 full_name TEXT NOT NULL,
                 organization TEXT NOT NULL,
                 config_file TEXT NOT NULL,
                 issue_time TEXT NOT NULL
             )",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO issued_configs
                 (user_id, full_name, organization, config_file, issue_time)
             VALUES (5, 'Old User', 'Legacy', 'old.conf', '2024-01-01 00:00:00')",
            [],
        )
        .unwrap();
        drop(conn);

        let ledger = IssuanceLedger::open(&db_path).unwrap();
        let record = ledger.list(10, 0).unwrap().remove(0);
        assert_eq!(record.config_file, "old.conf");
        assert_eq!(record.username, None);
        assert_eq!(record.kind, IssueKind::Standard);

        // New rows write the added columns.
        ledger
            .record(&issuance(6, "new.conf", IssueKind::Fast))
            .unwrap();
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_issue_kind_parse_is_forward_compatible() {
        assert_eq!(IssueKind::parse("standard"), IssueKind::Standard);
        assert_eq!(IssueKind::parse("fast"), IssueKind::Fast);
        assert_eq!(IssueKind::parse("admin_forced"), IssueKind::AdminForced);
        assert_eq!(IssueKind::parse("something-newer"), IssueKind::Standard);
    }
}
