use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use echoes_backup::load_config::load_config;

const FULL_CONFIG: &str = r##"
pipeline:
  source_dir: /data/echoes
  client_id: Fuenlabrada
  removal_offset_days: 14
  csv_report: true
ledger:
  path: /var/lib/echoes-backup/ledger.sqlite
sftp:
  host: sftp.example.com
  username: echoes
schedule:
  run_at: "01:30:00"
notify:
  slack:
    channel: "#echoes-alerts"
  mail:
    endpoint: https://mail.example.com/send
    from: backup@example.com
    recipients: "ops@example.com,lab@example.com"
"##;

fn config_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), content).unwrap();
    file
}

#[test]
#[serial]
fn loads_every_section_and_injects_secrets() {
    env::set_var("SFTP_PASSWORD", "sftp-secret");
    env::set_var("SLACK_TOKEN", "xoxb-secret");
    env::set_var("MAIL_API_KEY", "mail-secret");
    let file = config_file(FULL_CONFIG);

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.pipeline.source_dir, PathBuf::from("/data/echoes"));
    assert_eq!(config.pipeline.remote_path, "echoes/temp");
    assert_eq!(config.pipeline.report_subpath, "echoes_backup");
    assert_eq!(config.pipeline.removal_offset_days, Some(14));
    assert!(config.pipeline.csv_report);
    assert_eq!(
        config.ledger.path,
        PathBuf::from("/var/lib/echoes-backup/ledger.sqlite")
    );
    assert_eq!(config.sftp.address(), "sftp.example.com:22");
    assert_eq!(config.sftp.password, "sftp-secret");
    assert_eq!(config.schedule.run_at.to_string(), "01:30:00");

    let slack = config.notify.slack.as_ref().unwrap();
    assert_eq!(slack.token.as_deref(), Some("xoxb-secret"));
    let mail = config.notify.mail.as_ref().unwrap();
    assert_eq!(mail.api_key.as_deref(), Some("mail-secret"));
    assert_eq!(mail.recipient_list(), vec!["ops@example.com", "lab@example.com"]);

    // Secrets never reach the debug output.
    let debug = format!("{config:?}");
    assert!(!debug.contains("sftp-secret"));
    assert!(!debug.contains("xoxb-secret"));
    assert!(!debug.contains("mail-secret"));
}

#[test]
#[serial]
fn optional_sections_fall_back_to_defaults() {
    env::set_var("SFTP_PASSWORD", "sftp-secret");
    env::remove_var("SLACK_TOKEN");
    env::remove_var("MAIL_API_KEY");
    let file = config_file(
        r#"
pipeline:
  source_dir: ./data
  client_id: c1
  remote_path: backups
ledger:
  path: ./ledger.sqlite
sftp:
  host: localhost
  port: 2222
  username: tester
"#,
    );

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.pipeline.remote_client_dir(), "backups/c1");
    assert_eq!(config.pipeline.removal_offset_days, Some(21));
    assert!(!config.pipeline.csv_report);
    assert_eq!(config.sftp.address(), "localhost:2222");
    assert!(config.notify.slack.is_none());
    assert!(config.notify.mail.is_none());
}

#[test]
#[serial]
fn missing_sftp_password_is_an_error() {
    env::remove_var("SFTP_PASSWORD");
    let file = config_file(FULL_CONFIG);

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("SFTP_PASSWORD"));
}

#[test]
#[serial]
fn invalid_yaml_is_an_error() {
    env::set_var("SFTP_PASSWORD", "sftp-secret");
    let file = config_file("pipeline: [not, a, mapping]\n");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}
