use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::SessionError;
use crate::config::ClientConfig;
use crate::model::{EmailData, ProfileUpdate, UserProfile, decode_records};

const API_KEY_HEADER: &str = "api-key";

/// Body of `POST /auth/google`. `token` carries the authorization code (or,
/// for returning test accounts, the stored test identity).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRequest {
    pub token: String,
    pub is_test_user: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub token: String,
    pub user: UserProfile,
    #[serde(rename = "firstTime", alias = "first_time", default)]
    pub first_time: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    /// Whether the backend managed to revoke its Google grant.
    #[serde(rename = "revokeAcess", alias = "revokeAccess", default)]
    pub revoke_access: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    emails: Vec<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Everything the client asks of the JobPulse backend over HTTP.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserProfile, SessionError>;

    async fn exchange(&self, request: &ExchangeRequest)
    -> Result<ExchangeResponse, SessionError>;

    /// One-time Gmail push provisioning after the first real login.
    async fn provision_mailbox(&self, token: &str) -> Result<(), SessionError>;

    async fn update_profile(
        &self,
        token: &str,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, SessionError>;

    async fn delete_account(
        &self,
        token: &str,
        user_id: &str,
        email: &str,
    ) -> Result<DeleteResponse, SessionError>;

    async fn fetch_emails(&self, token: &str, refresh: bool)
    -> Result<Vec<EmailData>, SessionError>;
}

pub struct ReqwestAccountBackend {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl ReqwestAccountBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url.join(path).map_err(|err| {
            SessionError::InvalidConfig(format!("invalid backend path '{path}': {err}"))
        })
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header(API_KEY_HEADER, &self.api_key)
    }
}

#[async_trait]
impl AccountBackend for ReqwestAccountBackend {
    async fn verify(&self, token: &str) -> Result<UserProfile, SessionError> {
        let url = self.url("auth/verify")?;
        let response = self
            .authorized(self.client.get(url), token)
            .send()
            .await?;
        Ok(success_or_error(response).await?.json().await?)
    }

    async fn exchange(
        &self,
        request: &ExchangeRequest,
    ) -> Result<ExchangeResponse, SessionError> {
        let url = self.url("auth/google")?;
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(success_or_error(response).await?.json().await?)
    }

    async fn provision_mailbox(&self, token: &str) -> Result<(), SessionError> {
        let url = self.url("auth/watch")?;
        let response = self
            .authorized(self.client.post(url), token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        success_or_error(response).await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        token: &str,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, SessionError> {
        let url = self.url("auth/update")?;
        let response = self
            .authorized(self.client.patch(url), token)
            .json(update)
            .send()
            .await?;
        Ok(success_or_error(response).await?.json().await?)
    }

    async fn delete_account(
        &self,
        token: &str,
        user_id: &str,
        email: &str,
    ) -> Result<DeleteResponse, SessionError> {
        let mut url = self.url("auth/delete/")?;
        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidConfig("backend url cannot be a base".into()))?
            .pop_if_empty()
            .push(user_id);
        let response = self
            .authorized(self.client.delete(url), token)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        Ok(success_or_error(response).await?.json().await?)
    }

    async fn fetch_emails(
        &self,
        token: &str,
        refresh: bool,
    ) -> Result<Vec<EmailData>, SessionError> {
        let url = self.url("job/emails")?;
        let response = self
            .authorized(self.client.get(url), token)
            .query(&[("refresh", refresh)])
            .send()
            .await?;
        let body: EmailsResponse = success_or_error(response).await?.json().await?;
        if !body.success {
            return Err(SessionError::InvalidResponse(
                body.message
                    .unwrap_or_else(|| "email snapshot request was not successful".into()),
            ));
        }
        Ok(decode_records(body.emails))
    }
}

/// Passes successful responses through; turns everything else into a
/// [`SessionError`] carrying the backend's own message where it sent one.
async fn success_or_error(response: Response) -> Result<Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = backend_message(status, &text);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SessionError::RateLimited(message));
    }
    Err(SessionError::Backend { status, message })
}

fn backend_message(status: StatusCode, text: &str) -> String {
    let parsed: Option<ErrorBody> = serde_json::from_str(text).ok();
    parsed
        .and_then(|body| body.message.or(body.error))
        .filter(|message| !message.trim().is_empty())
        .or_else(|| {
            let trimmed = text.trim();
            (!trimmed.is_empty() && !trimmed.starts_with('{')).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("request failed with status {status}"))
}
