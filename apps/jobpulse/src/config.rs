use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE: &str = "http://127.0.0.1:3000";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:5173/auth/callback";
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// JobPulse client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend HTTP base, always ending in `/` so relative joins keep its path
    pub api_base: Url,
    /// Static key sent as the `api-key` header on every backend call
    pub api_key: String,
    /// Realtime channel base
    pub ws_base: Url,
    /// Directory for the file-backed credential store (`None` = `~/.jobpulse`)
    pub state_dir: Option<PathBuf>,
    pub fallback_delay: Duration,
    pub http_timeout: Duration,
    pub google_client_id: String,
    pub google_redirect_uri: String,
    pub support_webhook: Option<Url>,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base = non_empty_var("JOBPULSE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = parse_base_url(&api_base, "JOBPULSE_API_BASE_URL")?;

        let ws_base = match non_empty_var("JOBPULSE_WS_URL") {
            Some(raw) => parse_base_url(&raw, "JOBPULSE_WS_URL")?,
            None => websocket_base_for(&api_base)?,
        };

        let fallback_delay = non_empty_var("JOBPULSE_FALLBACK_DELAY_MS")
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FALLBACK_DELAY);
        let http_timeout = non_empty_var("JOBPULSE_HTTP_TIMEOUT_SECS")
            .and_then(|val| val.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let support_webhook = non_empty_var("JOBPULSE_SUPPORT_WEBHOOK")
            .map(|raw| {
                Url::parse(&raw).map_err(|err| {
                    ConfigError::Invalid(format!("invalid JOBPULSE_SUPPORT_WEBHOOK: {err}"))
                })
            })
            .transpose()?;

        Ok(Self {
            api_base,
            api_key: env::var("JOBPULSE_API_KEY").unwrap_or_default(),
            ws_base,
            state_dir: non_empty_var("JOBPULSE_STATE_DIR").map(PathBuf::from),
            fallback_delay,
            http_timeout,
            google_client_id: env::var("JOBPULSE_GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_redirect_uri: non_empty_var("JOBPULSE_GOOGLE_REDIRECT_URI")
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            support_webhook,
        })
    }

    /// Configuration pointing both channels at one backend, used by tests and
    /// embedders that don't read the environment.
    pub fn for_backend(api_base: &str, api_key: &str) -> Result<Self, ConfigError> {
        let api_base = parse_base_url(api_base, "api base")?;
        let ws_base = websocket_base_for(&api_base)?;
        Ok(Self {
            api_base,
            api_key: api_key.to_string(),
            ws_base,
            ..Self::default()
        })
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_base = Url::parse("http://127.0.0.1:3000/").expect("static url");
        let ws_base = Url::parse("ws://127.0.0.1:3000/").expect("static url");
        Self {
            api_base,
            api_key: String::new(),
            ws_base,
            state_dir: None,
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            google_client_id: String::new(),
            google_redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            support_webhook: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_base_url(raw: &str, field: &str) -> Result<Url, ConfigError> {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
    }
    if !base.contains("://") {
        base = format!("{}{base}", infer_scheme(&base));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base).map_err(|err| ConfigError::Invalid(format!("invalid {field}: {err}")))
}

/// Realtime base sharing host and path with the HTTP base.
pub(crate) fn websocket_base_for(api_base: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ConfigError::Invalid(format!(
                "cannot derive websocket url from scheme '{other}'"
            )));
        }
    };
    let mut ws = api_base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| ConfigError::Invalid(format!("cannot switch {api_base} to {scheme}")))?;
    Ok(ws)
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
    {
        "http://"
    } else {
        "https://"
    }
}
