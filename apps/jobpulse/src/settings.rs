use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::{StoreError, StoreExt};
use crate::auth::oauth::GOOGLE_PERMISSIONS_PAGE;
use crate::model::{
    NotificationEntry, NotificationStatus, OnboardingState, ProfileUpdate, UserProfile,
};
use crate::notify::Notice;
use crate::session::{SessionError, SessionManager};

pub const DISCORD_WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";
pub const INVALID_WEBHOOK: &str = "Please enter a valid Discord Webhook URL";
pub const INCOMPLETE_NOTIFICATIONS: &str = "Please fill all fields and choose a status trigger";
pub const EMAIL_MISMATCH: &str = "Email doesn't match. Account deletion canceled.";
pub const REVOKE_FAILED: &str =
    "There was an error revoking access to your account. Redirecting to where you can do it manually";
/// How long the front end should wait before sending the user to the manual
/// revoke page.
pub const MANUAL_REVOKE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0}")]
    Validation(&'static str),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<StoreError> for SettingsError {
    fn from(err: StoreError) -> Self {
        SettingsError::Session(err.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletionOutcome {
    /// Whether the backend revoked its Google grant itself.
    pub access_revoked: bool,
    /// Where the user can revoke access by hand when the backend could not.
    pub manual_revoke: Option<Url>,
}

/// Account settings for the signed-in user. Every successful update replaces
/// the session profile with the backend's answer; failures leave it alone.
#[derive(Clone)]
pub struct Settings {
    session: SessionManager,
}

impl Settings {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// A blank name keeps the current one.
    pub async fn update_name(&self, name: &str) -> Result<UserProfile, SettingsError> {
        let profile = self.session.require_profile()?;
        let name = match name.trim() {
            "" => profile.name.clone(),
            name => name.to_string(),
        };
        let update = ProfileUpdate {
            name: Some(name),
            ..ProfileUpdate::default()
        };
        self.apply(update, "Profile updated successfully!").await
    }

    pub async fn set_discord_webhook(&self, webhook: &str) -> Result<UserProfile, SettingsError> {
        let webhook = webhook.trim();
        if !webhook.starts_with(DISCORD_WEBHOOK_PREFIX) {
            return Err(self.reject(INVALID_WEBHOOK));
        }
        let update = ProfileUpdate {
            discord_webhook: Some(webhook.to_string()),
            ..ProfileUpdate::default()
        };
        self.apply(update, "Webhook saved successfully!").await
    }

    /// Entries are stored as two comma separated columns. With no entries the
    /// current columns (and trigger, when none is given) are sent back as-is.
    pub async fn update_notifications(
        &self,
        entries: &[NotificationEntry],
        trigger: Option<NotificationStatus>,
    ) -> Result<UserProfile, SettingsError> {
        let profile = self.session.require_profile()?;
        let incomplete = entries.iter().any(|entry| entry.value.trim().is_empty());
        if !entries.is_empty() && (trigger.is_none() || incomplete) {
            return Err(self.reject(INCOMPLETE_NOTIFICATIONS));
        }

        let channels = entries
            .iter()
            .map(|entry| entry.channel.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let values = entries
            .iter()
            .map(|entry| entry.value.trim())
            .collect::<Vec<_>>()
            .join(",");
        let update = ProfileUpdate {
            notification_channel: non_empty(channels).or(profile.notification_channel),
            notification_value: non_empty(values).or(profile.notification_value),
            notification_status: trigger
                .map(|status| status.as_str().to_string())
                .or(profile.notification_status),
            ..ProfileUpdate::default()
        };
        self.apply(update, "Notification settings saved successfully!")
            .await
    }

    /// Deletes the account once `confirm_email` matches the profile, then
    /// signs out and forgets any stored test account.
    pub async fn delete_account(&self, confirm_email: &str) -> Result<DeletionOutcome, SettingsError> {
        let (token, profile) = self.session.credentials()?;
        if confirm_email.trim() != profile.email {
            return Err(self.reject(EMAIL_MISMATCH));
        }

        let response = match self
            .session
            .backend()
            .delete_account(&token, &profile.id, &profile.email)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };

        let manual_revoke = if response.revoke_access {
            None
        } else {
            tracing::warn!(
                target: "jobpulse::settings",
                user_id = %profile.id,
                "backend could not revoke google access"
            );
            self.session.notifier().notify(Notice::warning(REVOKE_FAILED));
            Url::parse(GOOGLE_PERMISSIONS_PAGE).ok()
        };

        self.session
            .notifier()
            .notify(Notice::success("Account successfully deleted"));
        if let Err(err) = self.session.store().clear_test_snapshot() {
            tracing::warn!(target: "jobpulse::settings", error = %err, "failed to clear test account");
        }
        self.session.logout()?;
        tracing::info!(target: "jobpulse::settings", user_id = %profile.id, "account deleted");

        Ok(DeletionOutcome {
            access_revoked: response.revoke_access,
            manual_revoke,
        })
    }

    /// Stored onboarding progress; `None` when no first login happened here.
    pub fn onboarding(&self) -> Result<Option<OnboardingState>, SettingsError> {
        self.session.store().onboarding().map_err(SettingsError::from)
    }

    pub fn advance_onboarding(&self) -> Result<OnboardingState, SettingsError> {
        self.update_onboarding(OnboardingState::advance)
    }

    pub fn back_onboarding(&self) -> Result<OnboardingState, SettingsError> {
        self.update_onboarding(OnboardingState::back)
    }

    pub fn complete_onboarding(&self) -> Result<OnboardingState, SettingsError> {
        self.update_onboarding(OnboardingState::complete)
    }

    pub fn reset_onboarding(&self) -> Result<OnboardingState, SettingsError> {
        self.update_onboarding(|state| *state = OnboardingState::default())
    }

    fn update_onboarding(
        &self,
        change: impl FnOnce(&mut OnboardingState),
    ) -> Result<OnboardingState, SettingsError> {
        let store = self.session.store();
        let mut state = store.onboarding()?.unwrap_or_default();
        change(&mut state);
        store.set_onboarding(&state)?;
        Ok(state)
    }

    async fn apply(&self, update: ProfileUpdate, success: &str) -> Result<UserProfile, SettingsError> {
        let token = self.session.token()?;
        match self.session.backend().update_profile(&token, &update).await {
            Ok(profile) => {
                tracing::debug!(target: "jobpulse::settings", user_id = %profile.id, "profile updated");
                self.session.set_profile(Some(profile.clone()));
                self.session.notifier().notify(Notice::success(success));
                Ok(profile)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn reject(&self, message: &'static str) -> SettingsError {
        self.session.notifier().notify(Notice::error(message));
        SettingsError::Validation(message)
    }

    fn fail(&self, err: SessionError) -> SettingsError {
        tracing::warn!(target: "jobpulse::settings", error = %err, "settings request failed");
        self.session.notifier().notify(Notice::error(err.to_string()));
        SettingsError::Session(err)
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
