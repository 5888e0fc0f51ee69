use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use std::time::Duration;

use super::SyncError;
use super::frame::{self, Packet};
use super::machine::{ChannelEvent, INITIAL_EMAILS_EVENT, NEW_EMAILS_EVENT};
use crate::model::decode_records;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// The duplex channel as the sync runner needs it, nothing more.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Opens the connection, presenting `token` as the connection credential.
    /// Returning `Ok` does not mean the server accepted it; that arrives as
    /// [`ChannelEvent::Connected`] or [`ChannelEvent::ConnectError`].
    async fn connect(&mut self, token: &str) -> Result<(), SyncError>;

    /// `None` once the transport has nothing more to report.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn emit(&mut self, event: &str, args: Vec<Value>) -> Result<(), SyncError>;

    async fn close(&mut self);
}

/// Socket.IO client over a single WebSocket (no long-polling upgrade).
pub struct WebSocketTransport {
    url: Url,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    incoming: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    ws_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(ws_base: &Url) -> Result<Self, SyncError> {
        let mut url = ws_base.join("socket.io/")?;
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(Self {
            url,
            outgoing: None,
            incoming: None,
            ws_task: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn send_packet(&self, packet: &Packet) -> Result<(), SyncError> {
        let outgoing = self.outgoing.as_ref().ok_or(SyncError::Closed)?;
        outgoing
            .send(Message::Text(frame::encode(packet)))
            .map_err(|_| SyncError::Closed)
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&mut self, token: &str) -> Result<(), SyncError> {
        let (mut ws_stream, _) = connect_async(self.url.as_str()).await?;

        // The engine handshake must arrive before the namespace connect.
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => match frame::decode(&text)? {
                    Packet::Open(open) => {
                        tracing::trace!(target: "jobpulse::sync", %open, "engine handshake");
                        break;
                    }
                    other => {
                        return Err(SyncError::Handshake(format!(
                            "expected open packet, got {other:?}"
                        )));
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) | None => {
                    return Err(SyncError::Handshake("connection closed before open".into()));
                }
                Some(Err(err)) => return Err(err.into()),
            }
        }

        let auth = Packet::Connect(Some(json!({ "token": token })));
        ws_stream.send(Message::Text(frame::encode(&auth))).await?;

        let (tx_out, rx_out) = mpsc::unbounded_channel::<Message>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<ChannelEvent>();
        let ws_task = tokio::spawn(async move {
            handle_websocket(ws_stream, rx_out, tx_in).await;
        });

        self.outgoing = Some(tx_out);
        self.incoming = Some(rx_in);
        self.ws_task = Some(ws_task);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.incoming.as_mut()?.recv().await
    }

    async fn emit(&mut self, event: &str, args: Vec<Value>) -> Result<(), SyncError> {
        self.send_packet(&Packet::event(event, args))
    }

    async fn close(&mut self) {
        if self.send_packet(&Packet::Disconnect).is_ok() {
            if let Some(outgoing) = self.outgoing.as_ref() {
                let _ = outgoing.send(Message::Close(None));
            }
        }
        // Dropping the sender lets the socket task flush and exit on its own.
        self.outgoing = None;
        if let Some(mut task) = self.ws_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::debug!(target: "jobpulse::sync", "websocket task did not exit in time");
                task.abort();
            }
        }
        self.incoming = None;
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn handle_websocket(
    ws_stream: WsStream,
    mut rx_out: mpsc::UnboundedReceiver<Message>,
    tx_in: mpsc::UnboundedSender<ChannelEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = rx_out.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = ws_sender.send(message).await {
                        let _ = tx_in.send(ChannelEvent::Disconnected(err.to_string()));
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.close().await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match frame::decode(&text) {
                    Ok(Packet::Ping) => {
                        let pong = Message::Text(frame::encode(&Packet::Pong));
                        if ws_sender.send(pong).await.is_err() {
                            let _ = tx_in.send(ChannelEvent::Disconnected("transport error".into()));
                            break;
                        }
                    }
                    Ok(packet) => {
                        let terminal = matches!(
                            packet,
                            Packet::Close | Packet::Disconnect | Packet::ConnectError(_)
                        );
                        if let Some(event) = channel_event(packet) {
                            if tx_in.send(event).is_err() {
                                break;
                            }
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target: "jobpulse::sync", error = %err, "dropping undecodable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = tx_in.send(ChannelEvent::Disconnected("transport close".into()));
                    break;
                }
                Some(Err(err)) => {
                    let _ = tx_in.send(ChannelEvent::Disconnected(err.to_string()));
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

fn channel_event(packet: Packet) -> Option<ChannelEvent> {
    match packet {
        Packet::Connect(_) => Some(ChannelEvent::Connected),
        Packet::Disconnect => Some(ChannelEvent::Disconnected("io server disconnect".into())),
        Packet::Close => Some(ChannelEvent::Disconnected("transport close".into())),
        Packet::ConnectError(message) => Some(ChannelEvent::ConnectError(message)),
        Packet::Event { name, args } => {
            if name != INITIAL_EMAILS_EVENT && name != NEW_EMAILS_EVENT {
                tracing::debug!(target: "jobpulse::sync", event = %name, "ignoring event");
                return None;
            }
            let records = match args.into_iter().next() {
                Some(Value::Array(items)) => decode_records(items),
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    tracing::warn!(
                        target: "jobpulse::sync",
                        event = %name,
                        "dropping event whose payload is not a list"
                    );
                    return None;
                }
            };
            if name == INITIAL_EMAILS_EVENT {
                Some(ChannelEvent::InitialEmails(records))
            } else {
                Some(ChannelEvent::NewEmails(records))
            }
        }
        Packet::Open(_) | Packet::Ping | Packet::Pong | Packet::Noop => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_engine_url_under_base_path() {
        let base = Url::parse("wss://api.example.com/").unwrap();
        let transport = WebSocketTransport::new(&base).unwrap();
        assert_eq!(
            transport.url().as_str(),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn maps_record_events() {
        let packet = frame::decode(r#"42["newEmails",[{"id":1},{"_id":"2"}]]"#).unwrap();
        let Some(ChannelEvent::NewEmails(records)) = channel_event(packet) else {
            panic!("expected new emails");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id.as_str(), "2");

        let packet = frame::decode(r#"42["initialEmails"]"#).unwrap();
        assert_eq!(channel_event(packet), Some(ChannelEvent::InitialEmails(Vec::new())));
    }

    #[test]
    fn one_bad_record_does_not_drop_the_batch() {
        let packet = frame::decode(
            r#"42["newEmails",[{"id":1,"company":"Acme"},{"_id":"2","id":"2","lastUpdated":"2025-04-01","date":"2025-04-02"},{"company":"anonymous"}]]"#,
        )
        .unwrap();
        let Some(ChannelEvent::NewEmails(records)) = channel_event(packet) else {
            panic!("expected new emails");
        };
        let ids: Vec<_> = records.iter().map(|record| record.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(records[1].date.as_deref(), Some("2025-04-02"));
    }

    #[test]
    fn ignores_unknown_and_malformed_events() {
        let packet = frame::decode(r#"42["scanProgress",50]"#).unwrap();
        assert_eq!(channel_event(packet), None);
        let packet = frame::decode(r#"42["newEmails","oops"]"#).unwrap();
        assert_eq!(channel_event(packet), None);
        let packet = frame::decode(r#"40/admin,{"sid":"x"}"#).unwrap();
        assert_eq!(channel_event(packet), None);
    }
}
