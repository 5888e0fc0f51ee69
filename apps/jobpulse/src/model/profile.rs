use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::email::de_identity;

/// Backend marker for "no webhook configured".
pub const NO_WEBHOOK: &str = "NULL";

/// Full user profile as returned by `/auth/verify`, `/auth/google` and
/// `/auth/update`. Always replaced wholesale, never patched locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "_id", deserialize_with = "de_identity")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub discord_webhook: Option<String>,
    #[serde(default)]
    pub notification_channel: Option<String>,
    #[serde(default)]
    pub notification_value: Option<String>,
    #[serde(default)]
    pub notification_status: Option<String>,
    #[serde(default)]
    pub gmail_filter_id: Option<String>,
    #[serde(default)]
    pub is_test_user: bool,
    /// Fields this client does not interpret, kept so snapshots round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn has_discord_webhook(&self) -> bool {
        self.discord_webhook
            .as_deref()
            .map(|hook| {
                let hook = hook.trim();
                !hook.is_empty() && hook != NO_WEBHOOK
            })
            .unwrap_or(false)
    }

    pub fn has_email_filter(&self) -> bool {
        self.gmail_filter_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }

    /// Pairs the comma separated channel and value columns positionally.
    /// Missing values come back empty rather than shifting later entries.
    pub fn notification_entries(&self) -> Vec<NotificationEntry> {
        let (Some(channels), Some(values)) = (
            self.notification_channel.as_deref(),
            self.notification_value.as_deref(),
        ) else {
            return Vec::new();
        };
        if channels.trim().is_empty() || values.trim().is_empty() {
            return Vec::new();
        }

        let values: Vec<&str> = values.split(',').map(str::trim).collect();
        channels
            .split(',')
            .map(str::trim)
            .enumerate()
            .filter_map(|(index, raw)| {
                let channel = raw.parse::<NotificationChannel>().ok()?;
                Some(NotificationEntry {
                    channel,
                    value: values.get(index).copied().unwrap_or_default().to_string(),
                })
            })
            .collect()
    }

    pub fn trigger_status(&self) -> Option<NotificationStatus> {
        self.notification_status
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Whatsapp,
    Sms,
    Email,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Whatsapp => "whatsapp",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Email => "email",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(NotificationChannel::Whatsapp),
            "sms" => Ok(NotificationChannel::Sms),
            "email" => Ok(NotificationChannel::Email),
            other => Err(format!("unknown notification channel '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntry {
    pub channel: NotificationChannel,
    pub value: String,
}

/// Which status change triggers a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    All,
    Applied,
    #[serde(rename = "Interview Scheduled")]
    InterviewScheduled,
    Offer,
    Rejected,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::All => "All",
            NotificationStatus::Applied => "Applied",
            NotificationStatus::InterviewScheduled => "Interview Scheduled",
            NotificationStatus::Offer => "Offer",
            NotificationStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "all" => Ok(NotificationStatus::All),
            "applied" => Ok(NotificationStatus::Applied),
            "interviewscheduled" | "interview" => Ok(NotificationStatus::InterviewScheduled),
            "offer" => Ok(NotificationStatus::Offer),
            "rejected" => Ok(NotificationStatus::Rejected),
            _ => Err(format!("unknown notification status '{}'", s.trim())),
        }
    }
}

/// Body of `PATCH /auth/update`. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_status: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ProfileUpdate::default()
    }
}
