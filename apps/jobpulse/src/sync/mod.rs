//! Realtime record sync: a Socket.IO channel keyed by the signed-in user,
//! merged into one deduplicated record feed, with a one-shot HTTP fallback
//! when the channel never comes up.

pub mod channel;
pub mod fallback;
pub mod frame;
pub mod machine;
pub mod transport;

pub use channel::{RealtimeSync, SyncHandle};
pub use fallback::FallbackOutcome;
pub use frame::{FrameError, Packet};
pub use machine::{ChannelEvent, ChannelState, RecordFeed, SyncEffect, SyncMachine};
pub use transport::{RealtimeTransport, WebSocketTransport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid realtime url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("realtime channel closed")]
    Closed,
}
