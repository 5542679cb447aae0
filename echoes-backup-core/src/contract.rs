#![allow(unused)]

//! # contract: collaborator interfaces for the backup pipeline
//!
//! This module defines the data model tracked by the ledger and the four traits
//! the stage handlers talk to:
//! - [`Ledger`]: the persistent per-file, per-stage outcome store
//! - [`Archiver`]: local compression, deletion and listing
//! - [`RemoteStore`]: the remote server (artifact upload and daily report merge)
//! - [`Notifier`]: best-effort failure alerts
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so tests can generate deterministic
//!   mocks (`MockLedger`, `MockArchiver`, `MockRemoteStore`, `MockNotifier`).
//! - The mocks are exported under the `test-export-mocks` feature for use from
//!   other crates' test suites.
//!
//! ## Adding New Collaborators
//! - Implement the trait for your transport or store.
//! - Convert all upstream errors into the trait's error type; handlers decide
//!   what is retryable.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, LedgerError, NotifyError, TransferError};

/// One pipeline step for a single filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "csv-merge")]
    CsvMerge,
    #[serde(rename = "compress")]
    Compress,
    #[serde(rename = "send")]
    Send,
}

impl Stage {
    /// Stages in pipeline order.
    pub const ORDERED: [Stage; 3] = [Stage::CsvMerge, Stage::Compress, Stage::Send];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CsvMerge => "csv-merge",
            Stage::Compress => "compress",
            Stage::Send => "send",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv-merge" => Ok(Stage::CsvMerge),
            "compress" => Ok(Stage::Compress),
            "send" => Ok(Stage::Send),
            other => Err(LedgerError::Corrupt(format!("unknown stage {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Fail => "fail",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "fail" => Ok(Outcome::Fail),
            other => Err(LedgerError::Corrupt(format!("unknown outcome {other:?}"))),
        }
    }
}

/// Number of files owned directly by one directory of a compressed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCount {
    /// Path relative to the compressed root, `/`-prefixed (`/` is the root itself).
    pub path: String,
    pub files: u64,
}

/// Per-directory file counts, sorted by path.
pub type Statistics = Vec<DirectoryCount>;

/// The unit of tracked work: one outcome of one stage for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub stage: Stage,
    pub outcome: Outcome,
    pub retries: u32,
    pub statistics: Option<Statistics>,
    pub timestamp: DateTime<Utc>,
}

/// Everything needed to insert or update a ledger record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub filename: String,
    pub stage: Stage,
    pub outcome: Outcome,
    pub retries: u32,
    pub statistics: Option<Statistics>,
}

impl RecordUpdate {
    pub fn success(filename: &str, stage: Stage, retries: u32) -> Self {
        Self {
            filename: filename.to_string(),
            stage,
            outcome: Outcome::Success,
            retries,
            statistics: None,
        }
    }

    pub fn fail(filename: &str, stage: Stage, retries: u32) -> Self {
        Self {
            filename: filename.to_string(),
            stage,
            outcome: Outcome::Fail,
            retries,
            statistics: None,
        }
    }

    pub fn with_statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = Some(statistics);
        self
    }
}

/// Persistent store of per-filename, per-stage outcome records.
///
/// Records are keyed by `(filename, stage, outcome)`: at most one success and one
/// fail record exist per stage. Implementations must make each call atomic for a
/// single record; calls for different filenames may run concurrently.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert or update the unique record for `(filename, stage, outcome)` and
    /// return what was stored. The timestamp is set to now.
    async fn upsert(&self, update: RecordUpdate) -> Result<FileRecord, LedgerError>;

    /// Point lookup.
    async fn get(
        &self,
        filename: &str,
        stage: Stage,
        outcome: Outcome,
    ) -> Result<Option<FileRecord>, LedgerError>;

    /// All fail records, optionally restricted to one stage.
    async fn get_all_failed(&self, stage: Option<Stage>) -> Result<Vec<FileRecord>, LedgerError>;

    /// All success records of one stage.
    async fn get_all_succeeded(&self, stage: Stage) -> Result<Vec<FileRecord>, LedgerError>;

    /// Remove a record. Fails with [`LedgerError::NotFound`] if it does not exist.
    async fn delete(&self, filename: &str, stage: Stage, outcome: Outcome) -> Result<(), LedgerError>;
}

/// Local filesystem side of the pipeline.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Compress the directory at `path` into `path + ".zip"` and return the
    /// statistics of the tree as it was before compression.
    async fn compress(&self, path: &Path) -> Result<Statistics, ArchiveError>;

    /// Remove a file or directory. A missing target is not an error.
    async fn delete(&self, path: &Path) -> Result<(), ArchiveError>;

    /// Entry names of a directory.
    async fn list(&self, dir: &Path) -> Result<Vec<String>, ArchiveError>;
}

/// The remote server. Paths are `/`-separated and relative to the login directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create `remote_dir` (recursively) and write the local file into it under
    /// its own name, overwriting any previous copy.
    async fn upload_file(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError>;

    async fn file_exists(&self, remote_file: &str) -> Result<bool, TransferError>;

    async fn append_to_file(&self, remote_file: &str, content: &str) -> Result<(), TransferError>;

    /// Create (or truncate) `remote_file`, creating its parent directory recursively.
    async fn create_file(&self, remote_file: &str, content: &str) -> Result<(), TransferError>;
}

/// A failure alert channel (chat, email).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Joins remote path segments with `/`, ignoring empty segments and stray slashes.
/// An absolute first segment keeps the result absolute.
pub fn remote_join(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    match segments.first() {
        Some(first) if first.starts_with('/') => format!("/{joined}"),
        _ => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_round_trip_through_their_names() {
        for stage in Stage::ORDERED {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("compressed".parse::<Stage>().is_err());
    }

    #[test]
    fn stage_order_is_pipeline_order() {
        assert!(Stage::CsvMerge < Stage::Compress);
        assert!(Stage::Compress < Stage::Send);
    }

    #[test]
    fn remote_join_normalises_slashes() {
        assert_eq!(remote_join(&["echoes/temp/", "Fuenlabrada"]), "echoes/temp/Fuenlabrada");
        assert_eq!(
            remote_join(&["echoes/temp", "Fuenlabrada", "", "/echoes_backup/", "daily.csv"]),
            "echoes/temp/Fuenlabrada/echoes_backup/daily.csv"
        );
        assert_eq!(remote_join(&["/srv/backups", "client"]), "/srv/backups/client");
    }
}
