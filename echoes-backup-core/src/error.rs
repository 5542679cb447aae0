//! Error taxonomy for the pipeline and its collaborators.
//!
//! Each collaborator has its own error enum. Stage handlers fold them into
//! [`PipelineError`], which is what the orchestrator sees at the per-file boundary.

use std::path::PathBuf;

use crate::contract::{Outcome, Stage};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// An expected local file or directory is absent.
    #[error("Source missing: {0}")]
    SourceMissing(PathBuf),

    /// A name that is not a `YYYY-MM-DD` work item.
    #[error("Invalid filename {0:?}, expected a YYYY-MM-DD day name")]
    InvalidFilename(String),

    /// The daily report has no row for the requested day.
    #[error("Line for filename does not exist in CSV daily report | Filename {filename} | Report {report:?}")]
    RowNotFound { filename: String, report: PathBuf },

    /// Network or filesystem failure expected to succeed on retry.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Malformed daily report {report:?}: {source}")]
    Report {
        report: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("No {outcome} record for stage {stage} | Filename {filename}")]
    NotFound {
        filename: String,
        stage: Stage,
        outcome: Outcome,
    },

    #[error("Ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("File {0:?} does not exist")]
    SourceMissing(PathBuf),

    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Statistics error: {0}")]
    Statistics(#[from] StatisticsError),

    #[error("Archive worker failed: {0}")]
    Worker(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StatisticsError {
    #[error("Directory {0:?} not found")]
    NotFound(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("SSH/SFTP error: {0}")]
    Ssh(String),

    #[error("Transfer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer worker failed: {0}")]
    Worker(String),
}

/// Notification failures are logged by callers and never propagated further.
#[derive(thiserror::Error, Debug)]
#[error("Notification failure ({channel}): {message}")]
pub struct NotifyError {
    pub channel: &'static str,
    pub message: String,
}

impl From<ArchiveError> for PipelineError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::SourceMissing(path) => PipelineError::SourceMissing(path),
            ArchiveError::Statistics(StatisticsError::NotFound(path)) => {
                PipelineError::SourceMissing(path)
            }
            other => PipelineError::TransientIo(other.to_string()),
        }
    }
}

impl From<TransferError> for PipelineError {
    fn from(e: TransferError) -> Self {
        PipelineError::TransientIo(e.to_string())
    }
}
