//! WebSocket transport adapter for the two protocol channels.
//!
//! [`WsBridge`] lets external riders and scooters (a phone app, a test
//! harness, a browser console) take part in the protocol without linking
//! against this workspace:
//!
//! * every frame published on either [`Topic`] is forwarded to connected
//!   clients as `{"topic": "toClients", "payload": {...}}`;
//! * every client text frame of the same shape is published on the named
//!   topic, byte-for-byte, so the receiving actor performs the usual
//!   decoding and error classification.
//!
//! The bridge never interprets commands.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use scoot_types::{Event, ScootError};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "scoot-middleware::ws_bridge";

/// Bridge between the internal [`EventBus`] and WebSocket clients.
#[derive(Clone)]
pub struct WsBridge {
    bus: EventBus,
}

impl WsBridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start a WebSocket server on `addr`.
    ///
    /// Runs until the listener cannot be bound; per-client failures are
    /// logged and do not stop the server.
    ///
    /// # Errors
    ///
    /// Returns [`ScootError::Channel`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), ScootError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ScootError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(addr = %addr, "ws bridge listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ScootError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| ScootError::Channel(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut to_server = self.bus.subscribe_to(Topic::ToServer);
        let mut to_clients = self.bus.subscribe_to(Topic::ToClients);

        loop {
            let outbound = tokio::select! {
                result = to_server.recv() => (Topic::ToServer, result),
                result = to_clients.recv() => (Topic::ToClients, result),
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str());
                        }
                        _ => {}
                    }
                    continue;
                }
            };

            match outbound {
                (topic, Ok(event)) => {
                    let Some(frame) = encode_frame(topic, &event) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                (_, Err(_)) => break,
            }
        }

        info!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Publish an incoming client frame on the topic it names.
    ///
    /// The frame must be `{"topic": "toServer"|"toClients", "payload": ...}`.
    /// An object payload is re-encoded as JSON; a string payload is published
    /// as its raw bytes.  Anything else is ignored.
    fn handle_incoming_ws_message(&self, text: &str) {
        let Ok(json) = serde_json::from_str::<Value>(text) else {
            debug!("ignoring non-JSON ws frame");
            return;
        };

        let Some(topic) = json.get("topic").and_then(|t| t.as_str()).and_then(Topic::parse) else {
            debug!("ignoring ws frame without a known topic");
            return;
        };

        let payload = match json.get("payload") {
            Some(Value::String(raw)) => raw.clone().into_bytes(),
            Some(value @ Value::Object(_)) => value.to_string().into_bytes(),
            _ => {
                debug!(topic = %topic, "ignoring ws frame without payload");
                return;
            }
        };

        if let Err(e) = self.bus.publish_to(topic, Event::raw(SOURCE, payload)) {
            debug!(topic = %topic, error = %e, "ws frame dropped");
        }
    }
}

/// Wrap a bus frame for a WebSocket client.  Frames whose payload is not
/// JSON are forwarded as a string.
fn encode_frame(topic: Topic, event: &Event) -> Option<String> {
    let payload = match serde_json::from_slice::<Value>(&event.payload) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(&event.payload).into_owned()),
    };
    serde_json::to_string(&json!({ "topic": topic.as_str(), "payload": payload })).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::decode;
    use scoot_types::{Command, Location};

    fn make_bridge() -> (EventBus, WsBridge) {
        let bus = EventBus::default();
        let bridge = WsBridge::new(bus.clone());
        (bus, bridge)
    }

    #[tokio::test]
    async fn object_payload_goes_to_named_topic() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::ToServer);

        bridge.handle_incoming_ws_message(
            r#"{"topic":"toServer","payload":{"command":"phone_location","phone_name":"web","location":[1,2]}}"#,
        );

        let event = rx.recv().await?;
        assert_eq!(event.source, SOURCE);
        assert_eq!(
            decode(&event.payload)?,
            Command::PhoneLocation {
                phone_name: "web".into(),
                location: Location::new(1.0, 2.0)
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn incoming_string_payload_is_published_raw() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::ToClients);

        bridge.handle_incoming_ws_message(r#"{"topic":"toClients","payload":"not json"}"#);

        let event = rx.recv().await?;
        assert_eq!(event.payload, b"not json".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn incoming_unknown_topic_is_ignored() {
        let (bus, bridge) = make_bridge();
        let mut server_rx = bus.subscribe_to(Topic::ToServer);
        let mut clients_rx = bus.subscribe_to(Topic::ToClients);

        bridge.handle_incoming_ws_message(r#"{"topic":"/cmd_vel","payload":{"command":"x"}}"#);
        bridge.handle_incoming_ws_message("definitely not json");
        bridge.handle_incoming_ws_message(r#"{"topic":"toServer"}"#);

        assert!(server_rx.try_recv().is_err());
        assert!(clients_rx.try_recv().is_err());
    }

    #[test]
    fn outbound_frame_embeds_json_payload() -> Result<(), Box<dyn std::error::Error>> {
        let cmd = Command::PriceRemaining {
            phone_name: "p".into(),
            price: 0.25,
        };
        let event = Event::command("test", &cmd)?;
        let frame = encode_frame(Topic::ToClients, &event).ok_or("no frame")?;
        let value: Value = serde_json::from_str(&frame)?;
        assert_eq!(value["topic"], "toClients");
        assert_eq!(value["payload"]["command"], "price_remaining");
        assert_eq!(value["payload"]["price"], 0.25);
        Ok(())
    }

    #[test]
    fn outbound_frame_keeps_non_json_payload_as_string() -> Result<(), Box<dyn std::error::Error>> {
        let event = Event::raw("test", b"{broken".to_vec());
        let frame = encode_frame(Topic::ToServer, &event).ok_or("no frame")?;
        let value: Value = serde_json::from_str(&frame)?;
        assert_eq!(value["payload"], "{broken");
        Ok(())
    }
}
