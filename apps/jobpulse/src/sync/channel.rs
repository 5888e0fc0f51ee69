use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use super::fallback::{FallbackOutcome, FallbackPoller};
use super::machine::{ChannelEvent, ChannelState, RecordFeed, SyncEffect, SyncMachine};
use super::transport::RealtimeTransport;
use crate::model::{ApplicationRecord, EmailData, UserProfile, derive_applications};
use crate::notify::{Notice, Notifier};
use crate::session::AccountBackend;

/// Starts per-user sync sessions.
#[derive(Clone)]
pub struct RealtimeSync {
    backend: Arc<dyn AccountBackend>,
    notifier: Arc<dyn Notifier>,
    fallback_delay: Duration,
}

impl RealtimeSync {
    pub fn new(
        backend: Arc<dyn AccountBackend>,
        notifier: Arc<dyn Notifier>,
        fallback_delay: Duration,
    ) -> Self {
        Self {
            backend,
            notifier,
            fallback_delay,
        }
    }

    /// Starts connecting `transport` for `user` and arms the fallback timer
    /// at the same instant.
    pub fn start(
        &self,
        transport: Box<dyn RealtimeTransport>,
        token: String,
        user: &UserProfile,
    ) -> SyncHandle {
        let (records, _) = watch::channel(Vec::new());
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(SyncShared {
            slot: Mutex::new(FeedSlot {
                feed: RecordFeed::new(),
                closed: false,
            }),
            records,
            state,
            notifier: self.notifier.clone(),
            fallback: Mutex::new(None),
            fallback_outcome: Mutex::new(None),
        });

        let poller = FallbackPoller::new(self.fallback_delay, self.backend.clone(), token.clone());
        let fallback_task = tokio::spawn(poller.run(shared.clone()));
        *shared.fallback.lock() = Some(fallback_task.abort_handle());

        tracing::debug!(
            target: "jobpulse::sync",
            user_id = %user.id,
            test_user = user.is_test_user,
            "starting realtime sync"
        );
        let machine = SyncMachine::new(user.id.clone(), user.is_test_user);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let channel_task = tokio::spawn(run_channel(
            transport,
            machine,
            token,
            shared.clone(),
            shutdown_rx,
        ));

        SyncHandle {
            shared,
            shutdown: Some(shutdown_tx),
            channel_task: Some(channel_task),
            fallback_task: Some(fallback_task),
        }
    }
}

/// A running sync session. Dropping it aborts both tasks; [`SyncHandle::close`]
/// also says goodbye to the server.
pub struct SyncHandle {
    shared: Arc<SyncShared>,
    shutdown: Option<oneshot::Sender<()>>,
    channel_task: Option<JoinHandle<()>>,
    fallback_task: Option<JoinHandle<FallbackOutcome>>,
}

impl SyncHandle {
    pub fn records(&self) -> watch::Receiver<Vec<ApplicationRecord>> {
        self.shared.records.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.shared.channel_state()
    }

    /// Raw records currently held, in arrival order.
    pub fn emails(&self) -> Vec<EmailData> {
        self.shared.slot.lock().feed.emails().to_vec()
    }

    /// `None` until the fallback timer has fired (or if it was cancelled).
    pub fn fallback_outcome(&self) -> Option<FallbackOutcome> {
        *self.shared.fallback_outcome.lock()
    }

    /// Applies an externally fetched snapshot with the same replace semantics
    /// as `initialEmails`. Returns false once the handle is closed.
    pub fn replace_snapshot(&self, emails: Vec<EmailData>) -> bool {
        self.shared.replace_snapshot(emails)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops the fallback timer and closes the connection. Nothing mutates
    /// the records after this returns.
    pub async fn close(&mut self) {
        self.shared.mark_closed();
        self.shared.cancel_fallback();
        if let Some(task) = self.fallback_task.take() {
            task.abort();
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.channel_task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(target: "jobpulse::sync", error = %err, "realtime task failed");
                }
            }
        }
        self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ChannelState::Disconnected;
                true
            }
        });
        tracing::debug!(target: "jobpulse::sync", "realtime sync closed");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shared.mark_closed();
        if let Some(task) = self.fallback_task.take() {
            task.abort();
        }
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
    }
}

struct FeedSlot {
    feed: RecordFeed,
    closed: bool,
}

/// State both sync tasks write to. Every write happens under `slot`, and
/// nothing is written once `closed` is set.
pub(crate) struct SyncShared {
    slot: Mutex<FeedSlot>,
    records: watch::Sender<Vec<ApplicationRecord>>,
    state: watch::Sender<ChannelState>,
    notifier: Arc<dyn Notifier>,
    fallback: Mutex<Option<AbortHandle>>,
    fallback_outcome: Mutex<Option<FallbackOutcome>>,
}

impl SyncShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    fn mark_closed(&self) {
        self.slot.lock().closed = true;
    }

    pub(crate) fn channel_state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }

    pub(crate) fn record_fallback(&self, outcome: FallbackOutcome) {
        *self.fallback_outcome.lock() = Some(outcome);
    }

    fn cancel_fallback(&self) {
        if let Some(handle) = self.fallback.lock().take() {
            handle.abort();
            tracing::trace!(target: "jobpulse::sync", "fallback timer cancelled");
        }
    }

    pub(crate) fn replace_snapshot(&self, emails: Vec<EmailData>) -> bool {
        let mut slot = self.slot.lock();
        if slot.closed {
            return false;
        }
        slot.feed.replace(emails);
        self.records
            .send_replace(derive_applications(slot.feed.emails()));
        true
    }

    /// Runs one event through the machine; `None` once closed.
    fn dispatch(&self, machine: &mut SyncMachine, event: ChannelEvent) -> Option<Vec<SyncEffect>> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return None;
        }
        let effects = machine.handle(event, &mut slot.feed);
        if effects.contains(&SyncEffect::RecordsChanged) {
            self.records
                .send_replace(derive_applications(slot.feed.emails()));
        }
        let next = machine.state();
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
        Some(effects)
    }
}

async fn run_channel(
    mut transport: Box<dyn RealtimeTransport>,
    mut machine: SyncMachine,
    token: String,
    shared: Arc<SyncShared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        result = transport.connect(&token) => Some(result),
        _ = &mut shutdown => None,
    };
    match connected {
        None => {
            transport.close().await;
            return;
        }
        Some(Err(err)) => {
            tracing::warn!(target: "jobpulse::sync", error = %err, "realtime connect failed");
            shared.dispatch(&mut machine, ChannelEvent::ConnectError(err.to_string()));
            return;
        }
        Some(Ok(())) => {}
    }

    loop {
        let event = tokio::select! {
            event = transport.next_event() => event,
            _ = &mut shutdown => break,
        };
        let event =
            event.unwrap_or_else(|| ChannelEvent::Disconnected("transport ended".into()));
        let Some(effects) = shared.dispatch(&mut machine, event) else {
            break;
        };

        for effect in effects {
            match effect {
                SyncEffect::Emit { event, args } => {
                    if let Err(err) = transport.emit(event, args).await {
                        tracing::warn!(target: "jobpulse::sync", event, error = %err, "emit failed");
                    }
                }
                SyncEffect::Notify(count) => {
                    tracing::debug!(target: "jobpulse::sync", count, "merged new records");
                    shared.notify(Notice::new_records(count));
                }
                SyncEffect::CancelFallback => shared.cancel_fallback(),
                SyncEffect::RecordsChanged => {}
            }
        }

        if machine.state().is_terminal() {
            break;
        }
    }
    transport.close().await;
}
