//! Outgoing message channel
//!
//! Responses and events produced anywhere in the adapter are funnelled
//! through one [`Outbox`] into a single writer task, which assigns sequence
//! numbers and frames them onto the client stream in submission order.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};

use crate::common::error::ErrorMessage;
use crate::common::{Error, Result};

use super::codec;
use super::types::{Event, EventMessage, ResponseMessage};

/// A message waiting for its sequence number
#[derive(Debug)]
pub enum OutgoingMessage {
    Response {
        request_seq: i64,
        command: String,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    },
    Event(Event),
}

/// Cloneable handle for pushing messages to the client
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue the response to a request
    ///
    /// A failure is reported with `success: false`, the error text as
    /// `message` and a structured `body.error`.
    pub fn respond(&self, request_seq: i64, command: &str, result: Result<Option<Value>>) {
        let message = match result {
            Ok(body) => OutgoingMessage::Response {
                request_seq,
                command: command.to_string(),
                success: true,
                message: None,
                body,
            },
            Err(e) => {
                tracing::debug!(command = %command, error = %e, "Request failed");
                let error = serde_json::to_value(ErrorMessage::from(&e)).ok();
                OutgoingMessage::Response {
                    request_seq,
                    command: command.to_string(),
                    success: false,
                    message: Some(e.to_string()),
                    body: error.map(|error| serde_json::json!({ "error": error })),
                }
            }
        };
        self.push(message);
    }

    pub fn send_event(&self, event: Event) {
        self.push(OutgoingMessage::Event(event));
    }

    fn push(&self, message: OutgoingMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("Client writer is gone, dropping message");
        }
    }
}

/// Drain the outgoing channel onto `writer`
///
/// Runs until every [`Outbox`] is dropped or `stop` fires. On stop, the
/// messages already queued are still written.
pub async fn write_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    mut writer: W,
    mut stop: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let seq = AtomicI64::new(1);

    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => write_one(&mut writer, &seq, message).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(message) = rx.try_recv() {
                    write_one(&mut writer, &seq, message).await?;
                }
                break;
            }
        }
    }

    Ok(())
}

async fn write_one<W: AsyncWrite + Unpin>(
    writer: &mut W,
    seq: &AtomicI64,
    message: OutgoingMessage,
) -> Result<()> {
    let json = match message {
        OutgoingMessage::Response {
            request_seq,
            command,
            success,
            message,
            body,
        } => serde_json::to_string(&ResponseMessage {
            seq: seq.fetch_add(1, Ordering::SeqCst),
            message_type: "response".to_string(),
            request_seq,
            success,
            command,
            message,
            body,
        })?,
        OutgoingMessage::Event(event) => {
            let body = match event.body() {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(event = event.name(), error = %e, "Dropping unserializable event");
                    return Ok(());
                }
            };
            serde_json::to_string(&EventMessage {
                seq: seq.fetch_add(1, Ordering::SeqCst),
                message_type: "event".to_string(),
                event: event.name().to_string(),
                body,
            })?
        }
    };

    tracing::trace!(message = %json, "Sending to client");
    codec::write_message(writer, &json).await.map_err(|e| match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe => Error::ClientDisconnected,
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect(outbox: Outbox, rx: mpsc::UnboundedReceiver<OutgoingMessage>) -> Vec<Value> {
        drop(outbox);
        let mut buf = Vec::new();
        let (_stop_tx, stop_rx) = oneshot::channel();
        write_loop(rx, &mut buf, stop_rx).await.unwrap();

        let mut reader = BufReader::new(std::io::Cursor::new(buf));
        let mut messages = Vec::new();
        while let Ok(json) = codec::read_message(&mut reader).await {
            messages.push(serde_json::from_str(&json).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_messages_are_sequenced_in_order() {
        let (outbox, rx) = Outbox::channel();
        outbox.respond(1, "initialize", Ok(None));
        outbox.send_event(Event::Initialized);

        let messages = collect(outbox, rx).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["seq"], 1);
        assert_eq!(messages[0]["type"], "response");
        assert_eq!(messages[0]["request_seq"], 1);
        assert_eq!(messages[1]["seq"], 2);
        assert_eq!(messages[1]["event"], "initialized");
    }

    #[tokio::test]
    async fn test_failed_response_carries_error_body() {
        let (outbox, rx) = Outbox::channel();
        outbox.respond(7, "launch", Err(Error::missing_argument("mainClass")));

        let messages = collect(outbox, rx).await;
        let response = &messages[0];
        assert_eq!(response["success"], false);
        assert_eq!(response["message"], "Missing required argument 'mainClass'");
        assert_eq!(response["body"]["error"]["id"], 1001);
        assert_eq!(response["body"]["error"]["showUser"], true);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_messages() {
        let (outbox, rx) = Outbox::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        outbox.send_event(Event::output("stdout", "a\n".to_string()));
        stop_tx.send(()).unwrap();

        let mut buf = Vec::new();
        write_loop(rx, &mut buf, stop_rx).await.unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("\"output\""));
        drop(outbox);
    }
}
