//! SQLite-backed [`Ledger`].
//!
//! One table, `file_records`, keyed by `(filename, stage, outcome)`. Every write
//! is a single statement, so each record update is atomic without transactions.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::contract::{FileRecord, Ledger, Outcome, RecordUpdate, Stage, Statistics};
use crate::error::LedgerError;

const RECORD_COLUMNS: &str = "filename, stage, outcome, retries, statistics, updated_at";

pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Create or open the ledger database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Corrupt(format!("cannot create {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.migrate(true)?;
        info!(path = %path.display(), "Opened ledger database");
        Ok(ledger)
    }

    /// In-memory ledger, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.migrate(false)?;
        Ok(ledger)
    }

    fn migrate(&self, on_disk: bool) -> Result<(), LedgerError> {
        let conn = self.conn.lock();

        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                "#,
            )?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_records (
                filename TEXT NOT NULL,
                stage TEXT NOT NULL,
                outcome TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                statistics TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (filename, stage, outcome)
            );

            CREATE INDEX IF NOT EXISTS idx_file_records_outcome_stage
                ON file_records(outcome, stage);
            "#,
        )?;

        debug!("Ledger migrations complete");
        Ok(())
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<FileRecord>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn upsert(&self, update: RecordUpdate) -> Result<FileRecord, LedgerError> {
        let statistics = update
            .statistics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| LedgerError::Corrupt(format!("cannot encode statistics: {e}")))?;

        let conn = self.conn.lock();
        let record = conn.query_row(
            &format!(
                r#"
                INSERT INTO file_records (filename, stage, outcome, retries, statistics, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(filename, stage, outcome) DO UPDATE SET
                    retries = excluded.retries,
                    statistics = excluded.statistics,
                    updated_at = excluded.updated_at
                RETURNING {RECORD_COLUMNS}
                "#
            ),
            params![
                update.filename,
                update.stage.as_str(),
                update.outcome.as_str(),
                update.retries,
                statistics,
                Utc::now(),
            ],
            row_to_record,
        )?;

        debug!(
            filename = %record.filename,
            stage = %record.stage,
            outcome = %record.outcome,
            retries = record.retries,
            "Ledger record upserted"
        );
        Ok(record)
    }

    async fn get(
        &self,
        filename: &str,
        stage: Stage,
        outcome: Outcome,
    ) -> Result<Option<FileRecord>, LedgerError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_records \
                     WHERE filename = ?1 AND stage = ?2 AND outcome = ?3"
                ),
                params![filename, stage.as_str(), outcome.as_str()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn get_all_failed(&self, stage: Option<Stage>) -> Result<Vec<FileRecord>, LedgerError> {
        match stage {
            Some(stage) => self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_records \
                     WHERE outcome = ?1 AND stage = ?2 ORDER BY filename"
                ),
                params![Outcome::Fail.as_str(), stage.as_str()],
            ),
            None => self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_records \
                     WHERE outcome = ?1 ORDER BY filename, stage"
                ),
                params![Outcome::Fail.as_str()],
            ),
        }
    }

    async fn get_all_succeeded(&self, stage: Stage) -> Result<Vec<FileRecord>, LedgerError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM file_records \
                 WHERE outcome = ?1 AND stage = ?2 ORDER BY filename"
            ),
            params![Outcome::Success.as_str(), stage.as_str()],
        )
    }

    async fn delete(&self, filename: &str, stage: Stage, outcome: Outcome) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM file_records WHERE filename = ?1 AND stage = ?2 AND outcome = ?3",
            params![filename, stage.as_str(), outcome.as_str()],
        )?;
        if deleted == 0 {
            return Err(LedgerError::NotFound {
                filename: filename.to_string(),
                stage,
                outcome,
            });
        }
        debug!(filename, stage = %stage, outcome = %outcome, "Ledger record deleted");
        Ok(())
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let stage: String = row.get(1)?;
    let outcome: String = row.get(2)?;
    let statistics: Option<String> = row.get(4)?;

    let statistics = statistics
        .map(|raw| serde_json::from_str::<Statistics>(&raw))
        .transpose()
        .map_err(|e| conversion_error(4, e))?;

    Ok(FileRecord {
        filename: row.get(0)?,
        stage: stage.parse().map_err(|e| conversion_error(1, e))?,
        outcome: outcome.parse().map_err(|e| conversion_error(2, e))?,
        retries: row.get(3)?,
        statistics,
        timestamp: row.get::<_, DateTime<Utc>>(5)?,
    })
}
