use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use url::Url;

/// Record identity. The backend sends either numbers or strings; both collapse
/// to the same textual key so `1` and `"1"` are one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EmailId(String);

impl EmailId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmailId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for EmailId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for EmailId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        de_identity(deserializer).map(EmailId)
    }
}

pub(crate) fn de_identity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct IdentityVisitor;

    impl Visitor<'_> for IdentityVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or integer identity")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(IdentityVisitor)
}

/// Raw record pushed by the email scanner, as it arrives over the realtime
/// channel or from `/job/emails`.
///
/// The scanner has used several spellings for the same field over time. They
/// are resolved by precedence, so a record carrying two of them still decodes:
/// `id` over `_id`, `position` over `role` over `job_title`, `link` over `url`
/// over `job_link`, and `date` over `timestamp` over `received_at` over
/// `lastUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEmail")]
pub struct EmailData {
    pub id: EmailId,
    pub company: Option<String>,
    pub position: Option<String>,
    pub link: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireEmail {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "_id")]
    object_id: Option<Value>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    job_link: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    received_at: Option<String>,
    #[serde(default, rename = "lastUpdated")]
    last_updated: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<WireEmail> for EmailData {
    type Error = &'static str;

    fn try_from(wire: WireEmail) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .and_then(identity_of)
            .or_else(|| wire.object_id.and_then(identity_of))
            .ok_or("record has no string or integer id")?;
        Ok(Self {
            id: EmailId(id),
            company: wire.company,
            position: wire.position.or(wire.role).or(wire.job_title),
            link: wire.link.or(wire.url).or(wire.job_link),
            status: wire.status,
            location: wire.location,
            date: wire
                .date
                .or(wire.timestamp)
                .or(wire.received_at)
                .or(wire.last_updated),
            extra: wire.extra,
        })
    }
}

fn identity_of(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) if number.is_u64() || number.is_i64() => Some(number.to_string()),
        _ => None,
    }
}

/// Decodes a batch one record at a time. Unreadable records are logged and
/// skipped so one bad entry never costs the rest of the batch.
pub fn decode_records(items: Vec<Value>) -> Vec<EmailData> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    target: "jobpulse::model",
                    index,
                    error = %err,
                    "skipping unreadable record"
                );
                None
            }
        })
        .collect()
}

impl EmailData {
    /// Minimal record, mostly useful for fixtures.
    pub fn new(id: impl Into<EmailId>) -> Self {
        Self {
            id: id.into(),
            company: None,
            position: None,
            link: None,
            status: None,
            location: None,
            date: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationStatus {
    Applied,
    InterviewScheduled,
    Offer,
    Rejected,
    Other(String),
}

impl ApplicationStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "applied" => ApplicationStatus::Applied,
            "interviewscheduled" | "interview" => ApplicationStatus::InterviewScheduled,
            "offer" => ApplicationStatus::Offer,
            "rejected" => ApplicationStatus::Rejected,
            _ => ApplicationStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::InterviewScheduled => "Interview Scheduled",
            ApplicationStatus::Offer => "Offer",
            ApplicationStatus::Rejected => "Rejected",
            ApplicationStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// View-level card derived from one [`EmailData`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRecord {
    pub id: EmailId,
    pub company: String,
    pub role: String,
    pub external_link: Option<Url>,
    pub status: ApplicationStatus,
    pub location: String,
    pub timestamp: Option<OffsetDateTime>,
}

impl From<&EmailData> for ApplicationRecord {
    fn from(email: &EmailData) -> Self {
        Self {
            id: email.id.clone(),
            company: text_or_default(email.company.as_deref()),
            role: text_or_default(email.position.as_deref()),
            external_link: email
                .link
                .as_deref()
                .and_then(|raw| Url::parse(raw.trim()).ok()),
            status: email
                .status
                .as_deref()
                .map(ApplicationStatus::parse)
                .unwrap_or(ApplicationStatus::Applied),
            location: text_or_default(email.location.as_deref()),
            timestamp: email.date.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Recomputes the whole card list; records are never patched in place.
pub fn derive_applications(emails: &[EmailData]) -> Vec<ApplicationRecord> {
    emails.iter().map(ApplicationRecord::from).collect()
}

fn text_or_default(raw: Option<&str>) -> String {
    raw.map(str::trim).unwrap_or_default().to_string()
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    let format = time::format_description::parse("[year]-[month]-[day]").ok()?;
    Date::parse(raw, &format)
        .ok()
        .map(|date| date.midnight().assume_utc())
}
