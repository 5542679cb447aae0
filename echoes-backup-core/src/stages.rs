//! Stage handlers: compress, upload and report merge for a single filename.
//!
//! Every handler follows the same bookkeeping around its side effect:
//!   1. If the ledger already holds a success record for the stage, do nothing
//!      (and drop a stale fail record left behind by an interrupted run).
//!   2. Read the current retry count from the stage's fail record (0 if none).
//!   3. Run the side effect.
//!   4. On success, store a success record carrying that retry count, then remove
//!      the fail record if there was one.
//!   5. On failure, notify, store a fail record with the count incremented, and
//!      return the error so later stages for this filename are skipped.
//!
//! Ledger failures during bookkeeping are returned as-is without a fail record.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::archiver::archive_path;
use crate::config::PipelineConfig;
use crate::contract::{
    Archiver, Ledger, Notifier, Outcome, RecordUpdate, RemoteStore, Stage, Statistics,
};
use crate::dates::{local_today, should_remove, Today};
use crate::error::{PipelineError, PipelineResult};
use crate::report::{extract_daily_row, find_report};

pub struct StageHandlers {
    ledger: Arc<dyn Ledger>,
    archiver: Arc<dyn Archiver>,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
    today: Today,
}

impl StageHandlers {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        archiver: Arc<dyn Archiver>,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ledger,
            archiver,
            remote,
            notifier,
            config,
            today: local_today(),
        }
    }

    /// Replace the clock used for retention decisions.
    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn archiver(&self) -> &Arc<dyn Archiver> {
        &self.archiver
    }

    pub fn today(&self) -> chrono::NaiveDate {
        (self.today)()
    }

    /// Compress `<source_dir>/<filename>` into `<filename>.zip` and delete the raw directory.
    pub async fn handle_compression(&self, filename: &str) -> PipelineResult<()> {
        let raw_dir = self.config.day_dir(filename);

        if self.skip_if_succeeded(filename, Stage::Compress).await? {
            // An earlier run may have stopped between compressing and cleaning up.
            if tokio::fs::try_exists(&raw_dir).await.unwrap_or(false) {
                self.delete_local(&raw_dir, filename, "[COMPRESS]").await;
            }
            return Ok(());
        }

        info!(filename, "[COMPRESS] File compression has started");
        let statistics = self
            .attempt(
                filename,
                Stage::Compress,
                "Error compressing file. File will be saved for future reprocessing",
                async {
                    let statistics = self.archiver.compress(&raw_dir).await?;
                    Ok::<Option<Statistics>, PipelineError>(Some(statistics))
                },
            )
            .await?;

        info!(
            filename,
            directories = statistics.map(|s| s.len()).unwrap_or_default(),
            "[COMPRESS] File compression has been completed successfully"
        );
        self.delete_local(&raw_dir, filename, "[COMPRESS]").await;
        Ok(())
    }

    /// Upload `<source_dir>/<filename>.zip` to `<remote_path>/<client_id>/`.
    pub async fn handle_upload(&self, filename: &str) -> PipelineResult<()> {
        if self.skip_if_succeeded(filename, Stage::Send).await? {
            return Ok(());
        }

        let archive = archive_path(&self.config.day_dir(filename));
        let remote_dir = self.config.remote_client_dir();

        info!(filename, remote_dir = %remote_dir, "[UPLOAD] Uploading file");
        self.attempt(
            filename,
            Stage::Send,
            "Error uploading file. File will be saved for future resending",
            async {
                if !tokio::fs::try_exists(&archive).await.unwrap_or(false) {
                    return Err(PipelineError::SourceMissing(archive.clone()));
                }
                self.remote.upload_file(&archive, &remote_dir).await?;
                Ok::<Option<Statistics>, PipelineError>(None)
            },
        )
        .await?;
        info!(filename, "[UPLOAD] File uploaded successfully");

        if should_remove(filename, self.config.removal_offset_days, self.today()) {
            self.delete_local(&archive, filename, "[UPLOAD]").await;
        }
        Ok(())
    }

    /// Merge the local report's row for `filename` into the remote aggregate.
    pub async fn handle_csv_data(&self, filename: &str) -> PipelineResult<()> {
        if self.skip_if_succeeded(filename, Stage::CsvMerge).await? {
            info!(filename, "[CSV] Skipping file, the CSV for the file has already been processed");
            return Ok(());
        }

        info!(filename, "[CSV] Extracting CSV data");
        self.attempt(
            filename,
            Stage::CsvMerge,
            "Error extracting CSV data. File will be saved for future reprocessing",
            async {
                let source_dir = self.config.source_dir().to_path_buf();
                let entries = self.archiver.list(&source_dir).await?;
                let report = match find_report(&entries) {
                    Some(name) => source_dir.join(name),
                    None => return Err(PipelineError::SourceMissing(source_dir.join("*.csv"))),
                };

                let target = filename.to_string();
                let daily = tokio::task::spawn_blocking(move || extract_daily_row(&report, &target))
                    .await
                    .map_err(|e| PipelineError::TransientIo(e.to_string()))??;

                let remote_file = self.config.remote_report_file();
                if self.remote.file_exists(&remote_file).await? {
                    self.remote
                        .append_to_file(&remote_file, &daily.append_content())
                        .await?;
                } else {
                    self.remote
                        .create_file(&remote_file, &daily.create_content())
                        .await?;
                }
                Ok::<Option<Statistics>, PipelineError>(None)
            },
        )
        .await?;
        info!(filename, "[CSV] Extraction of CSV data has been completed successfully");
        Ok(())
    }

    /// Returns true if `stage` already succeeded for `filename`.
    async fn skip_if_succeeded(&self, filename: &str, stage: Stage) -> PipelineResult<bool> {
        if self
            .ledger
            .get(filename, stage, Outcome::Success)
            .await?
            .is_none()
        {
            return Ok(false);
        }

        debug!(filename, stage = %stage, "Stage already succeeded, skipping");
        if self.ledger.get(filename, stage, Outcome::Fail).await?.is_some() {
            warn!(filename, stage = %stage, "Removing stale fail record");
            self.ledger.delete(filename, stage, Outcome::Fail).await?;
        }
        Ok(true)
    }

    async fn attempt<Fut>(
        &self,
        filename: &str,
        stage: Stage,
        failure_message: &str,
        action: Fut,
    ) -> PipelineResult<Option<Statistics>>
    where
        Fut: Future<Output = PipelineResult<Option<Statistics>>>,
    {
        let previous_fail = self.ledger.get(filename, stage, Outcome::Fail).await?;
        let retries = previous_fail.as_ref().map(|r| r.retries).unwrap_or(0);

        match action.await {
            Ok(statistics) => {
                let mut update = RecordUpdate::success(filename, stage, retries);
                if let Some(stats) = statistics.clone() {
                    update = update.with_statistics(stats);
                }
                self.ledger.upsert(update).await?;
                if previous_fail.is_some() {
                    self.ledger.delete(filename, stage, Outcome::Fail).await?;
                }
                Ok(statistics)
            }
            Err(e) => {
                error!(filename, stage = %stage, retries = retries + 1, error = %e, "{failure_message}");
                if let Err(notify_err) = self
                    .notifier
                    .notify(&format!("{failure_message} | File {filename}"))
                    .await
                {
                    warn!(filename, stage = %stage, error = %notify_err, "Failed to send failure notification");
                }
                self.ledger
                    .upsert(RecordUpdate::fail(filename, stage, retries + 1))
                    .await?;
                Err(e)
            }
        }
    }

    async fn delete_local(&self, path: &Path, filename: &str, phase: &str) {
        if let Err(e) = self.archiver.delete(path).await {
            warn!(filename, path = %path.display(), error = ?e, "{phase} Failed to delete local copy");
        }
    }
}
