use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::contract::remote_join;

pub const DEFAULT_REMOTE_PATH: &str = "echoes/temp";
pub const DEFAULT_REPORT_SUBPATH: &str = "echoes_backup";
pub const DEFAULT_REMOVAL_OFFSET_DAYS: u32 = 21;
pub const REPORT_FILE_NAME: &str = "daily.csv";

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

fn default_report_subpath() -> String {
    DEFAULT_REPORT_SUBPATH.to_string()
}

fn default_removal_offset() -> Option<u32> {
    Some(DEFAULT_REMOVAL_OFFSET_DAYS)
}

/// Where the pipeline reads from and ships to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the raw day directories, their archives and the daily report.
    pub source_dir: PathBuf,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    pub client_id: String,
    #[serde(default = "default_report_subpath")]
    pub report_subpath: String,
    /// Days after which a sent archive is deleted locally. `None` keeps everything.
    #[serde(default = "default_removal_offset")]
    pub removal_offset_days: Option<u32>,
    /// Merge each day's row of the local report into the remote aggregate.
    #[serde(default)]
    pub csv_report: bool,
}

impl PipelineConfig {
    pub fn new(source_dir: impl Into<PathBuf>, client_id: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            remote_path: default_remote_path(),
            client_id: client_id.into(),
            report_subpath: default_report_subpath(),
            removal_offset_days: default_removal_offset(),
            csv_report: false,
        }
    }

    /// `<remote_path>/<client_id>`: where archives are uploaded.
    pub fn remote_client_dir(&self) -> String {
        remote_join(&[&self.remote_path, &self.client_id])
    }

    /// `<remote_path>/<client_id>/<report_subpath>/daily.csv`
    pub fn remote_report_file(&self) -> String {
        remote_join(&[
            &self.remote_path,
            &self.client_id,
            &self.report_subpath,
            REPORT_FILE_NAME,
        ])
    }

    pub fn day_dir(&self, filename: &str) -> PathBuf {
        self.source_dir.join(filename)
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn trace_loaded(&self) {
        info!(
            source_dir = %self.source_dir.display(),
            remote_dir = %self.remote_client_dir(),
            removal_offset_days = ?self.removal_offset_days,
            csv_report = self.csv_report,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

fn default_run_at() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN)
}

/// When the daily trigger fires, in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_run_at")]
    pub run_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
        }
    }
}

impl ScheduleConfig {
    pub fn trace_loaded(&self) {
        info!(run_at = %self.run_at, "Loaded ScheduleConfig");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths_follow_the_client_layout() {
        let config = PipelineConfig::new("/data/echoes", "Fuenlabrada");
        assert_eq!(config.remote_client_dir(), "echoes/temp/Fuenlabrada");
        assert_eq!(
            config.remote_report_file(),
            "echoes/temp/Fuenlabrada/echoes_backup/daily.csv"
        );
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"source_dir": "/data", "client_id": "c1"}"#).unwrap();
        assert_eq!(config.remote_path, DEFAULT_REMOTE_PATH);
        assert_eq!(config.removal_offset_days, Some(21));
        assert!(!config.csv_report);

        let config: PipelineConfig = serde_json::from_str(
            r#"{"source_dir": "/data", "client_id": "c1", "removal_offset_days": null}"#,
        )
        .unwrap();
        assert_eq!(config.removal_offset_days, None);
    }
}
