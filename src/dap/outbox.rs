//! Outgoing message queue of one connection.
//!
//! Handlers, the notification pump and the registry all produce messages
//! concurrently; a single writer drains the queue so that frames never
//! interleave and sequence numbers follow the order of the stream.

use crate::dap::io::DapWriter;
use crate::dap::protocol::{DapEvent, DapResponse, ErrorBody, ErrorMessage, ReplyTo};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::sync::mpsc;

#[derive(Debug)]
pub enum Outgoing {
    Response {
        reply: ReplyTo,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    },
    Event {
        event: &'static str,
        body: Option<Value>,
    },
    /// Flush everything queued before and close the connection.
    Close,
}

#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outgoing>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn push(&self, msg: Outgoing) {
        if self.tx.send(msg).is_err() {
            log::debug!(target: "dap", "drop outgoing message, connection writer gone");
        }
    }

    pub fn respond<T: Serialize>(&self, reply: &ReplyTo, body: T) {
        match serde_json::to_value(body) {
            Ok(body) => self.push(Outgoing::Response {
                reply: reply.clone(),
                success: true,
                message: None,
                body: Some(body),
            }),
            Err(e) => self.respond_error(
                reply,
                crate::error::wire::REQUEST_FAILED,
                format!("serialize response: {e}"),
            ),
        }
    }

    pub fn respond_empty(&self, reply: &ReplyTo) {
        self.push(Outgoing::Response {
            reply: reply.clone(),
            success: true,
            message: None,
            body: None,
        });
    }

    pub fn respond_error(&self, reply: &ReplyTo, id: i64, format: impl Into<String>) {
        let format = format.into();
        let body = serde_json::to_value(ErrorBody {
            error: ErrorMessage {
                id,
                format: format.clone(),
                show_user: true,
            },
        })
        .ok();
        self.push(Outgoing::Response {
            reply: reply.clone(),
            success: false,
            message: Some(format),
            body,
        });
    }

    pub fn send_event(&self, event: &'static str, body: Option<Value>) {
        self.push(Outgoing::Event { event, body });
    }

    pub fn close(&self) {
        self.push(Outgoing::Close);
    }
}

/// Drain `rx` into `writer` until a [`Outgoing::Close`] arrives, every sender
/// is gone or the stream fails.
pub fn run_writer<W: Write>(rx: mpsc::Receiver<Outgoing>, mut writer: DapWriter<W>) {
    let mut seq = 0;
    for msg in rx {
        seq += 1;
        let res = match msg {
            Outgoing::Response {
                reply,
                success,
                message,
                body,
            } => writer.write_message(&DapResponse {
                seq,
                r#type: "response",
                request_seq: reply.seq,
                success,
                command: reply.command,
                message,
                body,
            }),
            Outgoing::Event { event, body } => writer.write_message(&DapEvent {
                seq,
                r#type: "event",
                event,
                body,
            }),
            Outgoing::Close => break,
        };

        if let Err(e) = res {
            log::debug!(target: "dap", "write message: {e:#}");
            break;
        }
    }
}
