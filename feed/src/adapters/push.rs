//! ==============================================================================
//! push.rs - long-lived websocket channel carrying `new_data` events
//! ==============================================================================
//!
//! purpose:
//!     keeps one connection to the agent's message channel open and forwards
//!     every sample event to the store the moment it arrives.
//!
//! framing:
//!     the agent side is a socket.io server, so the websocket transport of
//!     engine.io v4 is understood:
//!
//! ```text
//!         server                         client
//!         0{"sid":..}   open       ->    40        join default namespace
//!         40{..}        joined
//!         2             ping       ->    3         pong
//!         42["new_data",{..}]  event
//!         41            namespace disconnect (treated as a drop)
//! ```
//!
//! plain json text frames work too: `{"event":"new_data","data":{..}}`,
//! or a bare sample object.
//!
//! reconnect:
//!     driven entirely by `RetryPolicy`. unbounded by default (1000ms fixed);
//!     a finite cap (e.g. 5 x 3000ms) makes the adapter give up and leave the
//!     view in ChannelDisconnected.
//!
//! ==============================================================================

use super::{pause, DataSource};
use crate::domain::{ErrorKind, RawSample};
use crate::retry::RetryPolicy;
use crate::store::{IngestSink, SourceKind};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct PushSettings {
    /// ws:// or wss:// url of the channel
    pub url: String,
    /// inbound event carrying one sample
    pub event: String,
    pub reconnect: RetryPolicy,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001/socket.io/?EIO=4&transport=websocket".to_string(),
            event: "new_data".to_string(),
            reconnect: RetryPolicy::push_default(),
        }
    }
}

// ==============================================================================
// frames
// ==============================================================================

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// engine.io handshake; we answer by joining the namespace
    Open,
    /// engine.io ping with optional payload
    Ping(String),
    /// namespace joined
    Joined,
    /// server closed the namespace
    Disconnect,
    /// a named event and its first argument
    Event { name: String, data: Value },
    /// anything else (pongs, acks, other namespaces)
    Ignored,
}

pub fn decode_frame(text: &str) -> Frame {
    let text = text.trim();
    match text.chars().next() {
        Some('{') | Some('[') => decode_json_frame(text),
        Some(c) if c.is_ascii_digit() => decode_engine_frame(text),
        _ => Frame::Ignored,
    }
}

fn decode_engine_frame(text: &str) -> Frame {
    let (kind, rest) = text.split_at(1);
    match kind {
        "0" => Frame::Open,
        "2" => Frame::Ping(rest.to_string()),
        "4" => decode_socketio_packet(rest),
        _ => Frame::Ignored,
    }
}

/// `<type>[/nsp,][ackid]<json>` after the engine.io "message" prefix
fn decode_socketio_packet(packet: &str) -> Frame {
    let Some(kind) = packet.chars().next() else {
        return Frame::Ignored;
    };
    let mut body = &packet[kind.len_utf8()..];
    if body.starts_with('/') {
        // only the default namespace is ours
        match body.find(',') {
            Some(idx) if &body[..idx] == "/" => body = &body[idx + 1..],
            Some(_) => return Frame::Ignored,
            None => body = "",
        }
    }
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Frame::Joined,
        '1' => Frame::Disconnect,
        '2' => match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(mut args)) if !args.is_empty() => {
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Frame::Ignored,
                };
                let data = if args.is_empty() { Value::Null } else { args.remove(0) };
                Frame::Event { name, data }
            }
            _ => Frame::Ignored,
        },
        _ => Frame::Ignored,
    }
}

fn decode_json_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Frame::Ignored,
    };
    match value {
        Value::Object(mut map) => match map.remove("event") {
            Some(Value::String(name)) => Frame::Event {
                name,
                data: map.remove("data").unwrap_or(Value::Null),
            },
            Some(_) => Frame::Ignored,
            // a bare sample object
            None => Frame::Event {
                name: String::new(),
                data: Value::Object(map),
            },
        },
        Value::Array(mut args) if !args.is_empty() => match args.remove(0) {
            Value::String(name) => Frame::Event {
                name,
                data: if args.is_empty() { Value::Null } else { args.remove(0) },
            },
            _ => Frame::Ignored,
        },
        _ => Frame::Ignored,
    }
}

// ==============================================================================
// adapter
// ==============================================================================

pub struct PushAdapter {
    settings: PushSettings,
}

/// why a connection ended
enum Ended {
    Cancelled,
    StoreGone,
    Dropped(String),
}

impl PushAdapter {
    pub fn new(settings: PushSettings) -> Self {
        Self { settings }
    }

    /// Is this frame a sample event for us?
    fn wants(&self, name: &str) -> bool {
        name.is_empty() || name == self.settings.event
    }

    async fn pump(&self, mut socket: Socket, sink: &IngestSink, cancel: &CancellationToken) -> Ended {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = socket.close(None).await;
                    return Ended::Cancelled;
                }
                message = socket.next() => message,
            };

            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    return Ended::Dropped(format!("closed by peer: {:?}", frame));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Ended::Dropped(e.to_string()),
                None => return Ended::Dropped("stream ended".to_string()),
            };

            match decode_frame(&text) {
                Frame::Open => {
                    if let Err(e) = socket.send(Message::Text("40".into())).await {
                        return Ended::Dropped(e.to_string());
                    }
                }
                Frame::Ping(payload) => {
                    if let Err(e) = socket.send(Message::Text(format!("3{}", payload))).await {
                        return Ended::Dropped(e.to_string());
                    }
                }
                Frame::Joined => debug!("namespace joined"),
                Frame::Disconnect => return Ended::Dropped("namespace disconnect".to_string()),
                Frame::Event { name, data } if self.wants(&name) => {
                    match serde_json::from_value::<RawSample>(data) {
                        Ok(raw) => match raw.check_boundary() {
                            Ok(()) => {
                                if !sink.sample(raw).await {
                                    return Ended::StoreGone;
                                }
                            }
                            Err(e) => warn!(error = %e, "push sample rejected at boundary"),
                        },
                        Err(e) => warn!(error = %e, "push event payload is not a sample"),
                    }
                }
                Frame::Event { name, .. } => debug!(event = %name, "ignoring event"),
                Frame::Ignored => {}
            }
        }
    }
}

impl DataSource for PushAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Push
    }

    fn run(self, sink: IngestSink, cancel: CancellationToken) -> impl Future<Output = ()> + Send {
        async move {
            let url = self.settings.url.clone();
            let mut failures: u32 = 0;

            loop {
                let connected = tokio::select! {
                    _ = cancel.cancelled() => break,
                    connected = connect_async(url.as_str()) => connected,
                };

                match connected {
                    Ok((socket, _)) => {
                        failures = 0;
                        info!(%url, "push channel connected");
                        if !sink.connected().await {
                            break;
                        }
                        match self.pump(socket, &sink, &cancel).await {
                            Ended::Cancelled | Ended::StoreGone => break,
                            Ended::Dropped(reason) => {
                                warn!(%url, %reason, "push channel dropped");
                            }
                        }
                    }
                    Err(e) => warn!(%url, error = %e, "push channel connect failed"),
                }

                if !sink.fault(ErrorKind::ChannelDisconnected).await {
                    break;
                }
                failures = failures.saturating_add(1);
                if self.settings.reconnect.exhausted(failures) {
                    error!(%url, attempts = failures - 1, "giving up on push channel");
                    break;
                }
                let delay = self.settings.reconnect.delay_for_attempt(failures);
                debug!(%url, delay_ms = delay.as_millis() as u64, "reconnecting");
                if !pause(delay, &cancel).await {
                    break;
                }
            }
            debug!(%url, "push loop exited");
        }
    }
}
