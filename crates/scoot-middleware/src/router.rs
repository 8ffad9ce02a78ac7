//! Message envelope decoding and command routing.
//!
//! Every inbound frame goes through [`decode`], which classifies failures
//! into the protocol's error taxonomy before any actor sees the message:
//!
//! | Failure | Error | Log level |
//! |---|---|---|
//! | not JSON, not an object, no string `command` | [`ScootError::MalformedMessage`] | `error` |
//! | `command` not part of the protocol | [`ScootError::UnknownCommand`] | `info` ("ignored") |
//! | known command, missing or ill-typed field | [`ScootError::MissingField`] | `error` |
//!
//! Decoding is all-or-nothing: a frame either becomes a complete [`Command`]
//! or it is dropped, so a bad message can never partially mutate state.  The
//! router holds no state; it hands `(topic, command)` to a
//! [`CommandHandler`].

use scoot_types::{Command, Event, ScootError};
use serde_json::Value;
use tracing::{error, info};

use crate::bus::{Topic, TopicReceiver};

/// Decode a raw payload into a [`Command`].
pub fn decode(payload: &[u8]) -> Result<Command, ScootError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| ScootError::MalformedMessage(format!("invalid JSON: {e}")))?;

    let name = match value.get("command") {
        Some(Value::String(name)) => name.clone(),
        Some(_) => {
            return Err(ScootError::MalformedMessage(
                "`command` is not a string".to_string(),
            ));
        }
        None => {
            return Err(ScootError::MalformedMessage(
                "message has no `command` field".to_string(),
            ));
        }
    };

    if !Command::is_known(&name) {
        return Err(ScootError::UnknownCommand(name));
    }

    serde_json::from_value(value).map_err(|e| ScootError::MissingField {
        command: name,
        details: e.to_string(),
    })
}

/// Decode `event` and log any failure according to the taxonomy.
///
/// Returns `None` when the frame was dropped.
pub fn route(topic: Topic, event: &Event) -> Option<Command> {
    match decode(&event.payload) {
        Ok(command) => Some(command),
        Err(ScootError::UnknownCommand(name)) => {
            info!(
                topic = %topic,
                source = %event.source,
                command = %name,
                "unknown command ignored"
            );
            None
        }
        Err(e) => {
            error!(topic = %topic, source = %event.source, error = %e, "message dropped");
            None
        }
    }
}

/// Receives every successfully decoded command of one topic.
pub trait CommandHandler: Send {
    fn handle(&mut self, topic: Topic, command: Command);
}

/// Pump `receiver` into `handler` until the bus closes.
///
/// The receiver's lane is lossless, so every frame published after the
/// subscription reaches the handler in publish order.
pub async fn pump<H: CommandHandler>(mut receiver: TopicReceiver, handler: &mut H) {
    let topic = receiver.topic();
    while let Ok(event) = receiver.recv().await {
        if let Some(command) = route(topic, &event) {
            handler.handle(topic, command);
        }
    }
}
