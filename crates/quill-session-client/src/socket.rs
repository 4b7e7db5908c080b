// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket [`Transport`] to the session hub.
//!
//! One connection is opened lazily and reused. Calls are serialized over it:
//! each call writes one `call` packet and reads until the `reply` with the
//! same id. Any I/O, framing or timeout failure drops the connection so the
//! next call reconnects and handshakes again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use quill_app_core::prefs::{ClientPrefs, DEFAULT_CALL_TIMEOUT_MS};
use quill_registry_api::{CallError, CallRequest, Transport};
use quill_session_proto::wire::{decode_message, encode_message, FrameBuffer, WireError};
use quill_session_proto::{
    default_socket_path, AckStatus, CallPayload, HandshakePayload, Message, ReplyResult,
};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

fn wire_failure(err: WireError) -> CallError {
    CallError::transport(format!("wire: {err}"))
}

fn io_failure(err: std::io::Error) -> CallError {
    CallError::transport(format!("io: {err}"))
}

struct Connection {
    stream: UnixStream,
    frames: FrameBuffer,
    ts: u64,
    session_id: String,
}

impl Connection {
    async fn send(&mut self, msg: &Message) -> Result<(), CallError> {
        self.ts += 1;
        let bytes = encode_message(msg, self.ts).map_err(wire_failure)?;
        self.stream.write_all(&bytes).await.map_err(io_failure)
    }

    async fn recv(&mut self) -> Result<Message, CallError> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(packet) = self.frames.next_packet().map_err(wire_failure)? {
                let (msg, _ts, _) = decode_message(&packet).map_err(wire_failure)?;
                return Ok(msg);
            }
            let n = self.stream.read(&mut buf).await.map_err(io_failure)?;
            if n == 0 {
                return Err(CallError::transport("hub closed the connection"));
            }
            self.frames.extend(&buf[..n]);
        }
    }
}

struct Shared {
    path: PathBuf,
    timeout: Duration,
    agent_id: Option<String>,
    next_id: AtomicU64,
    conn: Mutex<Option<Connection>>,
}

impl Shared {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn connect(&self) -> Result<Connection, CallError> {
        let stream = UnixStream::connect(&self.path).await.map_err(io_failure)?;
        let mut conn = Connection {
            stream,
            frames: FrameBuffer::new(),
            ts: 0,
            session_id: String::new(),
        };
        conn.send(&Message::Handshake(HandshakePayload::new(self.agent_id.clone())))
            .await?;
        loop {
            match conn.recv().await? {
                Message::HandshakeAck(ack) if ack.status == AckStatus::Ok => {
                    debug!(session_id = %ack.session_id, server_version = ack.server_version, "handshake accepted");
                    conn.session_id = ack.session_id;
                    return Ok(conn);
                }
                Message::HandshakeAck(ack) => {
                    let reason = ack.error.map_or_else(|| "unspecified".to_string(), |e| e.message);
                    return Err(CallError::transport(format!("handshake rejected: {reason}")));
                }
                Message::Error(err) => {
                    return Err(CallError::transport(format!("{}: {}", err.name, err.message)));
                }
                other => debug!(op = other.op_name(), "ignoring message before handshake ack"),
            }
        }
    }

    async fn exchange(&self, slot: &mut Option<Connection>, call: CallPayload) -> Result<ReplyResult, CallError> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(CallError::transport("connection unavailable"));
        };
        let id = call.id;
        conn.send(&Message::Call(call)).await?;
        loop {
            match conn.recv().await? {
                Message::Reply(reply) if reply.id == id => return Ok(reply.result),
                Message::Reply(reply) => debug!(id = reply.id, expected = id, "skipping reply to an abandoned call"),
                Message::Error(err) => {
                    return Err(CallError::transport(format!("{}: {}", err.name, err.message)));
                }
                other => debug!(op = other.op_name(), "ignoring unsolicited message"),
            }
        }
    }

    async fn call(&self, request: CallRequest) -> Result<Value, CallError> {
        let call = CallPayload {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            group: request.group,
            operation: request.operation,
            input: request.input,
        };
        let (group, operation) = (call.group.clone(), call.operation.clone());
        let mut slot = self.conn.lock().await;
        let outcome = tokio::time::timeout(self.timeout, self.exchange(&mut slot, call)).await;
        let failure = match outcome {
            Ok(Ok(result)) => return result.into(),
            Ok(Err(err)) => err,
            Err(_) => CallError::transport(format!(
                "{group}.{operation} timed out after {}ms",
                self.timeout.as_millis()
            )),
        };
        if let Some(conn) = slot.take() {
            warn!(session_id = %conn.session_id, %group, %operation, %failure, "dropping hub connection");
        }
        Err(failure)
    }
}

/// [`Transport`] over the hub's Unix socket.
///
/// Clones share the connection.
#[derive(Clone)]
pub struct SocketTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("path", &self.shared.path)
            .field("timeout", &self.shared.timeout)
            .field("agent_id", &self.shared.agent_id)
            .finish_non_exhaustive()
    }
}

impl SocketTransport {
    /// Transport to the hub at `path`, anonymous, default timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::build(path.into(), Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS), None)
    }

    /// Transport configured from saved client preferences.
    pub fn from_prefs(prefs: &ClientPrefs) -> Self {
        let path = prefs.socket_path.clone().unwrap_or_else(default_socket_path);
        Self::build(
            path,
            Duration::from_millis(prefs.call_timeout_ms),
            prefs.agent_id.clone(),
        )
    }

    fn build(path: PathBuf, timeout: Duration, agent_id: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path,
                timeout,
                agent_id,
                next_id: AtomicU64::new(1),
                conn: Mutex::new(None),
            }),
        }
    }

    /// Same socket, different per-call timeout. Does not share the connection.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self::build(self.shared.path.clone(), timeout, self.shared.agent_id.clone())
    }

    /// Same socket, announcing `agent_id`. Does not share the connection.
    pub fn with_agent(&self, agent_id: impl Into<String>) -> Self {
        Self::build(self.shared.path.clone(), self.shared.timeout, Some(agent_id.into()))
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }
}

impl Transport for SocketTransport {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>> {
        let shared = Arc::clone(&self.shared);
        async move { shared.call(request).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefs_drive_path_timeout_and_agent() {
        let prefs = ClientPrefs {
            socket_path: Some(PathBuf::from("/run/quill/hub.sock")),
            call_timeout_ms: 250,
            agent_id: Some("ops".into()),
        };
        let transport = SocketTransport::from_prefs(&prefs);
        assert_eq!(transport.path(), Path::new("/run/quill/hub.sock"));
        assert_eq!(transport.timeout(), Duration::from_millis(250));
        assert_eq!(transport.with_agent("bot").shared.agent_id.as_deref(), Some("bot"));
    }

    #[test]
    fn missing_path_falls_back_to_default_socket() {
        let transport = SocketTransport::from_prefs(&ClientPrefs::default());
        assert_eq!(transport.path(), default_socket_path());
        assert_eq!(transport.timeout(), Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS));
    }
}
