use serde_json::Value;
use std::collections::HashSet;

use crate::model::{EmailData, EmailId};

pub const REGISTER_EVENT: &str = "register";
pub const INITIAL_EMAILS_EVENT: &str = "initialEmails";
pub const NEW_EMAILS_EVENT: &str = "newEmails";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Receiving,
    Error,
    Disconnected,
}

impl ChannelState {
    /// Connected and every state reached through it by receiving data.
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected | ChannelState::Receiving)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Error | ChannelState::Disconnected)
    }
}

/// What a transport reports, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    InitialEmails(Vec<EmailData>),
    NewEmails(Vec<EmailData>),
    Disconnected(String),
    ConnectError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEffect {
    Emit { event: &'static str, args: Vec<Value> },
    /// `n` records were newly merged.
    Notify(usize),
    CancelFallback,
    RecordsChanged,
}

/// Raw records in arrival order plus the identities already held.
#[derive(Debug, Default, Clone)]
pub struct RecordFeed {
    emails: Vec<EmailData>,
    seen: HashSet<EmailId>,
}

impl RecordFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emails(&self) -> &[EmailData] {
        &self.emails
    }

    pub fn ids(&self) -> Vec<EmailId> {
        self.emails.iter().map(|email| email.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Snapshot semantics: whatever was held before is discarded. A snapshot
    /// that repeats an identity keeps its first occurrence.
    pub fn replace(&mut self, snapshot: Vec<EmailData>) {
        self.emails.clear();
        self.seen.clear();
        self.merge(snapshot);
    }

    /// Appends records whose identity is not yet held; returns how many.
    pub fn merge(&mut self, batch: Vec<EmailData>) -> usize {
        let before = self.emails.len();
        for email in batch {
            if self.seen.insert(email.id.clone()) {
                self.emails.push(email);
            }
        }
        self.emails.len() - before
    }
}

/// Channel lifecycle, kept free of any socket so it can be driven by hand.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    state: ChannelState,
    user_id: String,
    is_test_user: bool,
}

impl SyncMachine {
    pub fn new(user_id: impl Into<String>, is_test_user: bool) -> Self {
        Self {
            state: ChannelState::Connecting,
            user_id: user_id.into(),
            is_test_user,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn handle(&mut self, event: ChannelEvent, feed: &mut RecordFeed) -> Vec<SyncEffect> {
        if self.state.is_terminal() {
            tracing::debug!(target: "jobpulse::sync", ?event, "ignoring event on closed channel");
            return Vec::new();
        }

        match event {
            ChannelEvent::Connected => {
                if self.state.is_connected() {
                    return Vec::new();
                }
                self.state = ChannelState::Connected;
                vec![
                    SyncEffect::CancelFallback,
                    SyncEffect::Emit {
                        event: REGISTER_EVENT,
                        args: vec![
                            Value::String(self.user_id.clone()),
                            Value::Bool(self.is_test_user),
                        ],
                    },
                ]
            }
            ChannelEvent::InitialEmails(snapshot) => {
                self.state = ChannelState::Receiving;
                feed.replace(snapshot);
                vec![SyncEffect::RecordsChanged]
            }
            ChannelEvent::NewEmails(batch) => {
                self.state = ChannelState::Receiving;
                match feed.merge(batch) {
                    0 => Vec::new(),
                    added => vec![SyncEffect::RecordsChanged, SyncEffect::Notify(added)],
                }
            }
            ChannelEvent::Disconnected(reason) => {
                tracing::debug!(target: "jobpulse::sync", %reason, "channel disconnected");
                self.state = ChannelState::Disconnected;
                Vec::new()
            }
            ChannelEvent::ConnectError(message) => {
                tracing::debug!(target: "jobpulse::sync", %message, "channel failed to connect");
                self.state = ChannelState::Error;
                Vec::new()
            }
        }
    }
}
