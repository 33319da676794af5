//! The injected request handler contract.
//!
//! The connection decodes each inbound message and calls the handler
//! synchronously on its own task, so handlers either finish quickly or hand
//! work off to other threads and answer through
//! [`ConnectionHandle::post_response`](crate::connection::ConnectionHandle::post_response).

use crate::connection::{ConnectionHandle, Exchange};
use crate::error::ServerError;
use boltd_protocol::{BoltMsg, Encoder, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

/// Handles decoded messages for one connection.
pub trait RequestHandler: Send + Sync + 'static {
    /// Per-connection application context, created on connect and dropped at
    /// close.
    type Context: Send + 'static;

    /// Builds the context for a newly accepted connection.
    fn on_connect(&self, remote: SocketAddr, handle: ConnectionHandle) -> Self::Context;

    /// Handles one decoded message. May call `respond` zero or more times
    /// before returning; an error closes the connection.
    fn handle(
        &self,
        exchange: &mut Exchange<'_, Self::Context>,
        tag: BoltMsg,
        fields: Vec<Value>,
    ) -> Result<(), ServerError>;

    /// Called once when the connection ends, before the context is dropped.
    fn on_disconnect(&self, _ctx: &mut Self::Context) {}
}

/// Identity reported in Hello replies.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "boltd".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl ServerInfo {
    /// The `server` metadata string, e.g. `boltd/0.1.0`.
    pub fn agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Builds the metadata map of a Failure reply.
pub fn failure_meta(code: &str, message: &str) -> HashMap<String, Value> {
    HashMap::from([
        ("code".to_owned(), Value::from(code)),
        ("message".to_owned(), Value::from(message)),
    ])
}

/// Session state for [`NullSession`].
pub struct NullSessionState {
    pub connection_id: String,
    /// A failure is pending; streaming messages are ignored until RESET.
    failed: bool,
}

/// A stand-in for the external query/session layer: speaks the protocol
/// envelope but has no query engine behind it.
///
/// Answers HELLO with server metadata, acknowledges session control
/// messages, fails statements and transactions, and ignores streaming
/// messages while a failure is pending, as the protocol requires.
pub struct NullSession {
    info: ServerInfo,
}

impl NullSession {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }
}

impl RequestHandler for NullSession {
    type Context = NullSessionState;

    fn on_connect(&self, _remote: SocketAddr, _handle: ConnectionHandle) -> Self::Context {
        NullSessionState {
            connection_id: Uuid::new_v4().to_string(),
            failed: false,
        }
    }

    fn handle(
        &self,
        exchange: &mut Exchange<'_, Self::Context>,
        tag: BoltMsg,
        _fields: Vec<Value>,
    ) -> Result<(), ServerError> {
        let mut enc = Encoder::new();
        match tag {
            BoltMsg::Hello => {
                let meta = HashMap::from([
                    ("server".to_owned(), Value::from(self.info.agent())),
                    (
                        "connection_id".to_owned(),
                        Value::from(exchange.context().connection_id.clone()),
                    ),
                ]);
                enc.append_success(&meta)?;
            }
            BoltMsg::Logon | BoltMsg::Logoff | BoltMsg::Telemetry => {
                enc.append_success(&HashMap::new())?;
            }
            BoltMsg::Reset => {
                exchange.context().failed = false;
                enc.append_success(&HashMap::new())?;
            }
            BoltMsg::Goodbye => {
                exchange.close();
                return Ok(());
            }
            BoltMsg::Run | BoltMsg::Begin | BoltMsg::Commit | BoltMsg::Rollback => {
                if exchange.context().failed {
                    enc.append_ignored()?;
                } else {
                    exchange.context().failed = true;
                    enc.append_failure(&failure_meta(
                        "Neo.DatabaseError.General.UnknownError",
                        "no query engine is attached to this endpoint",
                    ))?;
                }
            }
            BoltMsg::PullN | BoltMsg::DiscardN => {
                if exchange.context().failed {
                    enc.append_ignored()?;
                } else {
                    exchange.context().failed = true;
                    enc.append_failure(&failure_meta(
                        "Neo.ClientError.Request.Invalid",
                        "no active query to stream from",
                    ))?;
                }
            }
            BoltMsg::Route => {
                if exchange.context().failed {
                    enc.append_ignored()?;
                } else {
                    exchange.context().failed = true;
                    enc.append_failure(&failure_meta(
                        "Neo.ClientError.Routing.RoutingFailed",
                        "routing is not available on this endpoint",
                    ))?;
                }
            }
            BoltMsg::Success | BoltMsg::Record | BoltMsg::Ignored | BoltMsg::Failure => {
                // Reply messages arriving from a client are a protocol abuse.
                exchange.context().failed = true;
                enc.append_failure(&failure_meta(
                    "Neo.ClientError.Request.Invalid",
                    "unexpected reply message from client",
                ))?;
            }
        }
        let framed = enc.take();
        if !framed.is_empty() {
            exchange.respond(framed);
        }
        Ok(())
    }
}
