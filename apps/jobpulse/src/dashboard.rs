use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::model::{ApplicationRecord, derive_applications};
use crate::notify::Notice;
use crate::session::{SessionError, SessionManager};
use crate::sync::{
    ChannelState, RealtimeSync, RealtimeTransport, SyncError, SyncHandle, WebSocketTransport,
};

pub const RESCAN_FAILED_NOTICE: &str = "Failed to rescan emails. Please try again later.";

pub type TransportFactory =
    Arc<dyn Fn() -> Result<Box<dyn RealtimeTransport>, SyncError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// One mounted application view: owns the realtime sync for the signed-in
/// user and the manual rescan.
pub struct Dashboard {
    session: SessionManager,
    sync: RealtimeSync,
    transports: TransportFactory,
    handle: Option<SyncHandle>,
}

impl Dashboard {
    pub fn new(session: SessionManager, config: &ClientConfig) -> Self {
        let ws_base = config.ws_base.clone();
        let transports: TransportFactory = Arc::new(move || {
            Ok(Box::new(WebSocketTransport::new(&ws_base)?) as Box<dyn RealtimeTransport>)
        });
        Self::with_transport(session, config.fallback_delay, transports)
    }

    pub fn with_transport(
        session: SessionManager,
        fallback_delay: Duration,
        transports: TransportFactory,
    ) -> Self {
        let sync = RealtimeSync::new(
            session.backend().clone(),
            session.notifier().clone(),
            fallback_delay,
        );
        Self {
            session,
            sync,
            transports,
            handle: None,
        }
    }

    /// Starts the channel for the current user. Mounting twice keeps the
    /// first channel.
    pub fn mount(&mut self) -> Result<(), DashboardError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let (token, profile) = self.session.credentials()?;
        let transport = (self.transports)()?;
        self.handle = Some(self.sync.start(transport, token, &profile));
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.is_some()
    }

    pub async fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
    }

    pub fn records(&self) -> Option<watch::Receiver<Vec<ApplicationRecord>>> {
        self.handle.as_ref().map(SyncHandle::records)
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.handle.as_ref().map(SyncHandle::channel_state)
    }

    pub fn sync_handle(&self) -> Option<&SyncHandle> {
        self.handle.as_ref()
    }

    /// Shown while the user has no Discord webhook configured.
    pub fn needs_webhook_banner(&self) -> bool {
        self.session
            .profile()
            .map(|profile| !profile.has_discord_webhook())
            .unwrap_or(false)
    }

    /// Asks the backend to rescan the mailbox and replaces local records with
    /// the returned snapshot.
    pub async fn rescan(&self) -> Result<Vec<ApplicationRecord>, DashboardError> {
        let token = self.session.token()?;
        let emails = match self.session.backend().fetch_emails(&token, true).await {
            Ok(emails) => emails,
            Err(err) => {
                tracing::warn!(target: "jobpulse::dashboard", error = %err, "rescan failed");
                self.session.notifier().notify(Notice::error(RESCAN_FAILED_NOTICE));
                return Err(err.into());
            }
        };
        let records = derive_applications(&emails);
        tracing::info!(target: "jobpulse::dashboard", count = records.len(), "rescan complete");
        if let Some(handle) = &self.handle {
            handle.replace_snapshot(emails);
        }
        Ok(records)
    }
}
