//! `load_config`: reads the YAML configuration and injects secrets from the environment.
//!
//! The file holds no secrets. These are read from the environment (or `.env`):
//! - `SFTP_PASSWORD` (required)
//! - `SLACK_TOKEN` (enables the Slack channel when a `notify.slack` section exists)
//! - `MAIL_API_KEY` (enables the mail channel when a `notify.mail` section exists)
//!
//! Any failure here surfaces at the CLI boundary as an `anyhow::Error` with context.

use anyhow::{Context, Result};
use echoes_backup_core::config::{PipelineConfig, ScheduleConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const SFTP_PASSWORD_ENV: &str = "SFTP_PASSWORD";
pub const SLACK_TOKEN_ENV: &str = "SLACK_TOKEN";
pub const MAIL_API_KEY_ENV: &str = "MAIL_API_KEY";

#[derive(Debug)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub ledger: LedgerSection,
    pub sftp: SftpSection,
    pub schedule: ScheduleConfig,
    pub notify: NotifySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSection {
    pub path: PathBuf,
}

fn default_sftp_port() -> u16 {
    22
}

#[derive(Clone, Deserialize)]
pub struct SftpSection {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    #[serde(skip)]
    pub password: String,
}

// Keeps the password out of logs.
impl std::fmt::Debug for SftpSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password_set", &!self.password.is_empty())
            .finish()
    }
}

impl SftpSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySection {
    pub slack: Option<SlackSection>,
    pub mail: Option<MailSection>,
}

#[derive(Clone, Deserialize)]
pub struct SlackSection {
    pub channel: String,
    #[serde(skip)]
    pub token: Option<String>,
}

impl std::fmt::Debug for SlackSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackSection")
            .field("channel", &self.channel)
            .field("token_set", &self.token.is_some())
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct MailSection {
    /// HTTP relay accepting `{from, to, subject, text}` JSON posts.
    pub endpoint: String,
    pub from: String,
    /// Comma-separated recipient addresses.
    pub recipients: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for MailSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSection")
            .field("endpoint", &self.endpoint)
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .field("api_key_set", &self.api_key.is_some())
            .finish()
    }
}

impl MailSection {
    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Loads the YAML config file at `path` and injects secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        pipeline: PipelineConfig,
        ledger: LedgerSection,
        sftp: SftpSection,
        #[serde(default)]
        schedule: ScheduleConfig,
        #[serde(default)]
        notify: NotifySection,
    }

    let raw: RawConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    let mut sftp = raw.sftp;
    sftp.password = non_empty_env(SFTP_PASSWORD_ENV)
        .with_context(|| format!("{SFTP_PASSWORD_ENV} must be set"))?;

    let mut notify = raw.notify;
    if let Some(slack) = notify.slack.as_mut() {
        slack.token = non_empty_env(SLACK_TOKEN_ENV);
        if slack.token.is_none() {
            warn!("{SLACK_TOKEN_ENV} not set, Slack notifications disabled");
        }
    }
    if let Some(mail) = notify.mail.as_mut() {
        mail.api_key = non_empty_env(MAIL_API_KEY_ENV);
        if mail.api_key.is_none() {
            warn!("{MAIL_API_KEY_ENV} not set, mail notifications disabled");
        }
    }

    let config = CliConfig {
        pipeline: raw.pipeline,
        ledger: raw.ledger,
        sftp,
        schedule: raw.schedule,
        notify,
    };
    config.pipeline.trace_loaded();
    config.schedule.trace_loaded();
    info!(
        ledger = %config.ledger.path.display(),
        sftp = %config.sftp.address(),
        slack = config.notify.slack.is_some(),
        mail = config.notify.mail.is_some(),
        "Loaded CliConfig"
    );
    Ok(config)
}
