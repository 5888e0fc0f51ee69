use crate::config::ClientConfig;
use thiserror::Error;
use url::Url;

pub const GOOGLE_AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_PERMISSIONS_PAGE: &str = "https://myaccount.google.com/permissions";

pub const SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/gmail.readonly",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedirectError {
    #[error("invalid redirect url: {0}")]
    InvalidUrl(String),
    #[error("identity provider returned an error: {0}")]
    Provider(String),
    #[error("No code found in URL")]
    MissingCode,
}

/// Authorization-code request URL for the Google consent screen.
pub fn authorization_url(config: &ClientConfig, state: Option<&str>) -> Url {
    let mut url = Url::parse(GOOGLE_AUTHORIZE_ENDPOINT).expect("static authorize endpoint");
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.google_client_id)
            .append_pair("redirect_uri", &config.google_redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    url
}

/// Pulls the authorization code out of the provider's redirect.
pub fn code_from_redirect(redirect: &str) -> Result<String, RedirectError> {
    let url = Url::parse(redirect.trim())
        .map_err(|err| RedirectError::InvalidUrl(err.to_string()))?;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => return Err(RedirectError::Provider(value.into_owned())),
            "code" if !value.trim().is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.ok_or(RedirectError::MissingCode)
}
