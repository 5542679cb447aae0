//! Slack and mail notification channels, wired into the core's fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use echoes_backup_core::contract::Notifier;
use echoes_backup_core::error::NotifyError;
use echoes_backup_core::notify::FanOutNotifier;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::load_config::{MailSection, NotifySection, SlackSection};

pub const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
pub const MAIL_SUBJECT: &str = "Echoes-backup client report";

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    client: reqwest::Client,
    url: String,
    channel: String,
    token: String,
}

impl SlackNotifier {
    pub fn new(channel: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: SLACK_POST_MESSAGE_URL.to_string(),
            channel: channel.into(),
            token: token.into(),
        }
    }

    fn failure(message: impl ToString) -> NotifyError {
        NotifyError {
            channel: "slack",
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&SlackMessage {
                channel: &self.channel,
                text: message,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Self::failure)?;

        let body: SlackResponse = response.json().await.map_err(Self::failure)?;
        if !body.ok {
            return Err(Self::failure(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        info!(channel = %self.channel, "Message posted to Slack");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MailMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Sends each alert as one email per recipient through an HTTP mail relay.
pub struct MailNotifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
    recipients: Vec<String>,
}

impl MailNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
            recipients,
        }
    }

    async fn send_to(&self, to: &str, message: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&MailMessage {
                from: &self.from,
                to,
                subject: MAIL_SUBJECT,
                text: message,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let results = join_all(self.recipients.iter().map(|to| async move {
            let result = self.send_to(to, message).await;
            match &result {
                Ok(()) => info!(to = %to, "Report email sent"),
                Err(e) => warn!(to = %to, error = %e, "Error sending report email"),
            }
            result
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            return Err(NotifyError {
                channel: "mail",
                message: format!("{failed} of {} emails failed", results.len()),
            });
        }
        Ok(())
    }
}

fn slack_notifier(section: &SlackSection) -> Option<Arc<dyn Notifier>> {
    let token = section.token.as_ref()?;
    Some(Arc::new(SlackNotifier::new(&section.channel, token)))
}

fn mail_notifier(section: &MailSection) -> Option<Arc<dyn Notifier>> {
    let api_key = section.api_key.as_ref()?;
    let recipients = section.recipient_list();
    if recipients.is_empty() {
        warn!("No mail recipients configured, mail notifications disabled");
        return None;
    }
    Some(Arc::new(MailNotifier::new(
        &section.endpoint,
        api_key,
        &section.from,
        recipients,
    )))
}

/// Builds the fan-out from the configured channels. Channels lacking their
/// secret are left out.
pub fn build_notifier(section: &NotifySection) -> FanOutNotifier {
    let notifiers: Vec<Arc<dyn Notifier>> = section
        .slack
        .as_ref()
        .and_then(slack_notifier)
        .into_iter()
        .chain(section.mail.as_ref().and_then(mail_notifier))
        .collect();
    info!(channels = notifiers.len(), "Notification channels configured");
    FanOutNotifier::new(notifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slack(token: Option<&str>) -> SlackSection {
        serde_yaml::from_str::<SlackSection>("channel: '#echoes-alerts'")
            .map(|mut s| {
                s.token = token.map(str::to_string);
                s
            })
            .unwrap()
    }

    fn mail(recipients: &str, api_key: Option<&str>) -> MailSection {
        let yaml = format!(
            "endpoint: https://mail.example.com/send\nfrom: backup@example.com\nrecipients: '{recipients}'"
        );
        let mut section: MailSection = serde_yaml::from_str(&yaml).unwrap();
        section.api_key = api_key.map(str::to_string);
        section
    }

    #[test]
    fn channels_without_secrets_are_left_out() {
        let section = NotifySection {
            slack: Some(slack(None)),
            mail: Some(mail("a@example.com", None)),
        };
        assert!(build_notifier(&section).is_empty());
    }

    #[test]
    fn configured_channels_join_the_fan_out() {
        let section = NotifySection {
            slack: Some(slack(Some("xoxb-token"))),
            mail: Some(mail("a@example.com, b@example.com", Some("key"))),
        };
        assert_eq!(build_notifier(&section).len(), 2);
    }

    #[test]
    fn mail_without_recipients_is_disabled() {
        let section = NotifySection {
            slack: None,
            mail: Some(mail(" , ", Some("key"))),
        };
        assert!(build_notifier(&section).is_empty());
    }

    #[test]
    fn slack_payload_matches_post_message() {
        let payload = serde_json::to_value(SlackMessage {
            channel: "#echoes-alerts",
            text: "Error uploading file",
        })
        .unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"channel": "#echoes-alerts", "text": "Error uploading file"})
        );
    }
}
