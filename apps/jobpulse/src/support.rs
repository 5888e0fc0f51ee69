use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::config::ClientConfig;
use crate::notify::{Notice, Notifier};

const BOT_NAME: &str = "Job Pulse Support Bot";
const EMBED_COLOR: u32 = 3_447_003;
pub const SUPPORT_SENT: &str = "Message sent successfully!";
pub const SUPPORT_FAILED: &str = "Failed to send message. Please try again later.";
pub const SUPPORT_INCOMPLETE: &str = "Please fill in all fields";
pub const SUPPORT_NOT_CONFIGURED: &str =
    "Support messages are disabled: set JOBPULSE_SUPPORT_WEBHOOK to enable them";

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("Please fill in all fields")]
    MissingFields,
    #[error("support webhook is not configured (JOBPULSE_SUPPORT_WEBHOOK)")]
    NotConfigured,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("discord webhook error: {0}")]
    Webhook(StatusCode),
}

#[derive(Debug, Serialize)]
struct SupportPayload<'a> {
    username: &'a str,
    content: &'a str,
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
    footer: Footer,
}

#[derive(Debug, Serialize)]
struct Footer {
    text: String,
}

/// Posts support requests to the team's Discord channel.
pub struct SupportClient {
    client: Client,
    webhook: Option<Url>,
    notifier: Arc<dyn Notifier>,
}

impl SupportClient {
    pub fn new(config: &ClientConfig, notifier: Arc<dyn Notifier>) -> Result<Self, SupportError> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            webhook: config.support_webhook.clone(),
            notifier,
        })
    }

    pub async fn send(
        &self,
        subject: &str,
        message: &str,
        sender_email: Option<&str>,
    ) -> Result<(), SupportError> {
        let (subject, message) = (subject.trim(), message.trim());
        if subject.is_empty() || message.is_empty() {
            self.notifier.notify(Notice::error(SUPPORT_INCOMPLETE));
            return Err(SupportError::MissingFields);
        }
        let Some(webhook) = self.webhook.clone() else {
            self.notifier.notify(Notice::error(SUPPORT_NOT_CONFIGURED));
            return Err(SupportError::NotConfigured);
        };

        let result = self.post(webhook, subject, message, sender_email).await;
        match &result {
            Ok(()) => self.notifier.notify(Notice::success(SUPPORT_SENT)),
            Err(err) => {
                tracing::warn!(target: "jobpulse::support", error = %err, "support message failed");
                self.notifier.notify(Notice::error(SUPPORT_FAILED));
            }
        }
        result
    }

    async fn post(
        &self,
        webhook: Url,
        subject: &str,
        message: &str,
        sender_email: Option<&str>,
    ) -> Result<(), SupportError> {
        let payload = support_payload(subject, message, sender_email, OffsetDateTime::now_utc());
        let response = self.client.post(webhook).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SupportError::Webhook(status));
        }
        Ok(())
    }
}

fn support_payload<'a>(
    subject: &'a str,
    message: &'a str,
    sender_email: Option<&str>,
    sent_at: OffsetDateTime,
) -> SupportPayload<'a> {
    SupportPayload {
        username: BOT_NAME,
        content: "**New Support Request**",
        embeds: [Embed {
            title: subject,
            description: message,
            color: EMBED_COLOR,
            timestamp: sent_at.format(&Rfc3339).unwrap_or_default(),
            footer: Footer {
                text: format!(
                    "Sent from JobPulse Support by {}",
                    sender_email.filter(|email| !email.is_empty()).unwrap_or("Anonymous")
                ),
            },
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLog;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn payload_matches_discord_embed_shape() {
        let payload = support_payload(
            "Login broken",
            "Cannot sign in",
            Some("ada@example.com"),
            datetime!(2024-05-01 12:00 UTC),
        );
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "username": "Job Pulse Support Bot",
                "content": "**New Support Request**",
                "embeds": [{
                    "title": "Login broken",
                    "description": "Cannot sign in",
                    "color": 3447003,
                    "timestamp": "2024-05-01T12:00:00Z",
                    "footer": { "text": "Sent from JobPulse Support by ada@example.com" }
                }]
            })
        );
    }

    #[tokio::test]
    async fn missing_webhook_names_the_setting() {
        let notices = Arc::new(NoticeLog::new());
        let support = SupportClient::new(&ClientConfig::default(), notices.clone()).unwrap();

        let err = support
            .send("Login broken", "Cannot sign in", None)
            .await
            .unwrap_err();

        assert!(matches!(err, SupportError::NotConfigured));
        assert_eq!(notices.messages(), vec![SUPPORT_NOT_CONFIGURED.to_string()]);
        assert!(SUPPORT_NOT_CONFIGURED.contains("JOBPULSE_SUPPORT_WEBHOOK"));

        let err = support.send(" ", "Cannot sign in", None).await.unwrap_err();
        assert!(matches!(err, SupportError::MissingFields));
        assert_eq!(notices.messages().last().map(String::as_str), Some(SUPPORT_INCOMPLETE));
    }

    #[test]
    fn anonymous_sender_is_labelled() {
        let payload = support_payload("s", "m", None, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(
            payload.embeds[0].footer.text,
            "Sent from JobPulse Support by Anonymous"
        );
    }
}
