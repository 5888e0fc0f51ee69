//! Socket.IO v4 packets carried in Engine.IO v4 text frames.
//!
//! Only the default namespace and the frame kinds the JobPulse channel uses
//! are understood. Binary attachments are rejected.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine handshake (`0{"sid":..,"pingInterval":..}`).
    Open(Value),
    /// Engine close (`1`).
    Close,
    Ping,
    Pong,
    /// Socket connect (`40`). Client side carries the auth object, server
    /// side the namespace session id.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(String),
    Noop,
}

impl Packet {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Packet::Event {
            name: name.into(),
            args,
        }
    }
}

pub fn decode(frame: &str) -> Result<Packet, FrameError> {
    let mut chars = frame.chars();
    let engine = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();
    match engine {
        '0' => Ok(Packet::Open(parse_json(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '6' => Ok(Packet::Noop),
        other => Err(FrameError::UnknownEngineType(other)),
    }
}

fn decode_socket(frame: &str) -> Result<Packet, FrameError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let Some(payload) = default_namespace(chars.as_str()) else {
        tracing::debug!(target: "jobpulse::sync", frame, "ignoring packet for another namespace");
        return Ok(Packet::Noop);
    };
    let payload = strip_ack_id(payload);
    match kind {
        '0' => {
            if payload.trim().is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(parse_json(payload)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let Value::Array(mut items) = parse_json(payload)? else {
                return Err(FrameError::Payload("event payload is not an array".into()));
            };
            if items.is_empty() {
                return Err(FrameError::Payload("event without a name".into()));
            }
            let Value::String(name) = items.remove(0) else {
                return Err(FrameError::Payload("event name is not a string".into()));
            };
            Ok(Packet::Event { name, args: items })
        }
        '4' => {
            let message = match parse_json(payload) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Ok(Value::String(message)) => message,
                _ => payload.to_string(),
            };
            Ok(Packet::ConnectError(message))
        }
        other => Err(FrameError::UnknownSocketType(other)),
    }
}

/// Drops a `/nsp,` prefix. `None` when the packet is addressed to any
/// namespace other than the default one.
fn default_namespace(payload: &str) -> Option<&str> {
    if !payload.starts_with('/') {
        return Some(payload);
    }
    let (namespace, rest) = payload.split_once(',').unwrap_or((payload, ""));
    (namespace == "/").then_some(rest)
}

fn strip_ack_id(payload: &str) -> &str {
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json(raw: &str) -> Result<Value, FrameError> {
    serde_json::from_str(raw).map_err(|err| FrameError::Payload(err.to_string()))
}

pub fn encode(packet: &Packet) -> String {
    match packet {
        Packet::Open(value) => format!("0{value}"),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Connect(None) => "40".to_string(),
        Packet::Connect(Some(value)) => format!("40{value}"),
        Packet::Disconnect => "41".to_string(),
        Packet::Event { name, args } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            format!("42{}", Value::Array(items))
        }
        Packet::ConnectError(message) => {
            format!("44{}", serde_json::json!({ "message": message }))
        }
        Packet::Noop => "6".to_string(),
    }
}
