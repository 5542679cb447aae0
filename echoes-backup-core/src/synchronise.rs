//! High-level pipeline: decides, from the local directory and the ledger, which
//! stages remain for each day and drives the [`StageHandlers`] through them.
//!
//! # Drivers
//! - [`Pipeline::synchronise`]: every day found in the source directory
//! - [`Pipeline::process_file`]: one named day
//! - [`Pipeline::process_retries`]: every day with a fail record, resumed from its
//!   earliest failed stage
//! - [`Pipeline::delete_old_files`]: retention sweep over sent days
//! - [`Pipeline::run_daily`]: yesterday, then retries, then retention
//!
//! # Error Handling
//! Stage failures are isolated per day: they are logged, recorded in the ledger by
//! the handlers and reported in the returned report, and never abort the batch.
//! Only a failing ledger query or directory listing fails a whole driver.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archiver::archive_path;
use crate::contract::{Outcome, Stage};
use crate::dates::{is_day_name, previous_day, should_remove, strip_archive_extension};
use crate::error::{LedgerError, PipelineError, PipelineResult};
use crate::stages::StageHandlers;

/// Outcome of one day's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub filename: String,
    /// `None` if every remaining stage succeeded.
    pub error: Option<String>,
}

impl FileReport {
    fn from_result(filename: &str, result: PipelineResult<()>) -> Self {
        Self {
            filename: filename.to_string(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct SynchroniseReport {
    pub run_id: Uuid,
    pub files: Vec<FileReport>,
}

impl SynchroniseReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }
}

#[derive(Debug)]
pub struct RetentionReport {
    pub run_id: Uuid,
    /// Days whose local archive and success records were deleted.
    pub purged: Vec<String>,
    /// Sent days still inside the retention window.
    pub kept: usize,
    pub errors: Vec<FileReport>,
}

#[derive(Debug)]
pub struct DailyReport {
    pub run_id: Uuid,
    pub yesterday: FileReport,
    pub retries: SynchroniseReport,
    pub retention: RetentionReport,
}

pub struct Pipeline {
    handlers: StageHandlers,
}

impl Pipeline {
    pub fn new(handlers: StageHandlers) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &StageHandlers {
        &self.handlers
    }

    /// Process every day present in the source directory, as a raw directory,
    /// an archive, or both.
    pub async fn synchronise(&self) -> PipelineResult<SynchroniseReport> {
        let run_id = Uuid::new_v4();
        let source_dir = self.handlers.config().source_dir();
        info!(%run_id, source_dir = %source_dir.display(), "[SYNC] Starting full synchronisation");

        let entries = self.handlers.archiver().list(source_dir).await?;

        // filename -> needs compression
        let mut days: BTreeMap<String, bool> = BTreeMap::new();
        for entry in &entries {
            let filename = strip_archive_extension(entry);
            if !is_day_name(filename) {
                continue;
            }
            let raw = entry.as_str() == filename;
            *days.entry(filename.to_string()).or_default() |= raw;
        }
        info!(%run_id, days = days.len(), "[SYNC] Found days to process");

        let csv = self.handlers.config().csv_report;
        let files = join_all(days.iter().map(|(filename, &compress)| async move {
            let result = self.run_chain(filename, Stage::CsvMerge, csv, compress).await;
            self.log_result("[SYNC]", filename, result)
        }))
        .await;

        let report = SynchroniseReport { run_id, files };
        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "[SYNC] Synchronisation complete"
        );
        Ok(report)
    }

    /// Run the whole chain for one day. Compression is skipped only when the
    /// archive exists and the raw directory does not.
    pub async fn process_file(&self, filename: &str) -> FileReport {
        info!(filename, "[PROCESS] Processing file");
        let result = async {
            if !is_day_name(filename) {
                return Err(PipelineError::InvalidFilename(filename.to_string()));
            }
            let compress = self.needs_compression(filename).await;
            let csv = self.handlers.config().csv_report;
            self.run_chain(filename, Stage::CsvMerge, csv, compress).await
        }
        .await;
        self.log_result("[PROCESS]", filename, result)
    }

    /// Resume every day that has a fail record from its earliest failed stage.
    pub async fn process_retries(&self) -> PipelineResult<SynchroniseReport> {
        let run_id = Uuid::new_v4();
        let ledger = self.handlers.ledger();

        let mut earliest: BTreeMap<String, Stage> = BTreeMap::new();
        for stage in Stage::ORDERED {
            for record in ledger.get_all_failed(Some(stage)).await? {
                earliest.entry(record.filename).or_insert(stage);
            }
        }
        info!(%run_id, files = earliest.len(), "[RETRY] Retrying failed files");

        let files = join_all(earliest.iter().map(|(filename, &from)| async move {
            let compress = from <= Stage::Compress && self.needs_compression(filename).await;
            // A csv-merge fail record means the merge was enabled when it failed.
            let csv = from == Stage::CsvMerge;
            let result = self.run_chain(filename, from, csv, compress).await;
            self.log_result("[RETRY]", filename, result)
        }))
        .await;

        let report = SynchroniseReport { run_id, files };
        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "[RETRY] Retry sweep complete"
        );
        Ok(report)
    }

    /// Delete the local archive and success records of every sent day older
    /// than the retention offset. No offset keeps everything.
    pub async fn delete_old_files(&self) -> PipelineResult<RetentionReport> {
        let run_id = Uuid::new_v4();
        let mut report = RetentionReport {
            run_id,
            purged: Vec::new(),
            kept: 0,
            errors: Vec::new(),
        };

        let Some(offset) = self.handlers.config().removal_offset_days else {
            info!(%run_id, "[PURGE] No removal offset configured, keeping all files");
            return Ok(report);
        };

        let today = self.handlers.today();
        let sent = self.handlers.ledger().get_all_succeeded(Stage::Send).await?;
        let (expired, kept): (Vec<_>, Vec<_>) = sent
            .into_iter()
            .partition(|r| should_remove(&r.filename, Some(offset), today));
        report.kept = kept.len();
        info!(%run_id, expired = expired.len(), kept = report.kept, "[PURGE] Deleting old files");

        let results = join_all(expired.iter().map(|record| async move {
            (record.filename.as_str(), self.purge(&record.filename).await)
        }))
        .await;

        for (filename, result) in results {
            match result {
                Ok(()) => report.purged.push(filename.to_string()),
                Err(e) => {
                    error!(filename, error = %e, "[PURGE] Failed to delete old file");
                    report.errors.push(FileReport::from_result(filename, Err(e)));
                }
            }
        }
        info!(
            %run_id,
            purged = report.purged.len(),
            failed = report.errors.len(),
            "[PURGE] Retention sweep complete"
        );
        Ok(report)
    }

    /// Yesterday's file, then the retry sweep, then the retention sweep.
    pub async fn run_daily(&self) -> PipelineResult<DailyReport> {
        let run_id = Uuid::new_v4();
        let filename = previous_day(self.handlers.today());
        info!(%run_id, filename = %filename, "[DAILY] Starting daily run");

        let yesterday = self.process_file(&filename).await;
        let retries = self.process_retries().await?;
        let retention = self.delete_old_files().await?;

        info!(%run_id, "[DAILY] Daily run complete");
        Ok(DailyReport {
            run_id,
            yesterday,
            retries,
            retention,
        })
    }

    async fn run_chain(
        &self,
        filename: &str,
        from: Stage,
        csv: bool,
        compress: bool,
    ) -> PipelineResult<()> {
        if csv && from <= Stage::CsvMerge {
            self.handlers.handle_csv_data(filename).await?;
        }
        if compress && from <= Stage::Compress {
            self.handlers.handle_compression(filename).await?;
        }
        self.handlers.handle_upload(filename).await
    }

    async fn needs_compression(&self, filename: &str) -> bool {
        let raw_dir = self.handlers.config().day_dir(filename);
        let raw_exists = tokio::fs::try_exists(&raw_dir).await.unwrap_or(false);
        let archive_exists = tokio::fs::try_exists(archive_path(&raw_dir))
            .await
            .unwrap_or(false);
        raw_exists || !archive_exists
    }

    async fn purge(&self, filename: &str) -> PipelineResult<()> {
        let archive = archive_path(&self.handlers.config().day_dir(filename));
        self.handlers.archiver().delete(&archive).await?;

        let ledger = self.handlers.ledger();
        for stage in [Stage::Send, Stage::CsvMerge, Stage::Compress] {
            match ledger.delete(filename, stage, Outcome::Success).await {
                Ok(()) | Err(LedgerError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(filename, "[PURGE] Deleted old file");
        Ok(())
    }

    fn log_result(&self, phase: &str, filename: &str, result: PipelineResult<()>) -> FileReport {
        match &result {
            Ok(()) => info!(filename, "{phase} File processed"),
            Err(e @ PipelineError::Ledger(_)) => error!(filename, error = %e, "{phase} Ledger failure"),
            Err(e) => warn!(filename, error = %e, "{phase} File left for a later retry"),
        }
        FileReport::from_result(filename, result)
    }
}
