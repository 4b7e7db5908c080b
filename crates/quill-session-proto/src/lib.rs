// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema for the Quill hub.
//!
//! Every message travels as a CBOR [`OpEnvelope`] inside a checksummed
//! packet (see [`wire`]). A connection opens with `handshake` /
//! `handshake_ack`; afterwards each `call` is answered by exactly one
//! `reply` carrying the same `id`. `error` reports protocol failures that
//! are not tied to a call.

use std::collections::BTreeMap;
use std::path::PathBuf;

use quill_registry_api::CallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod wire;

/// Protocol implementation version announced in handshakes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default Unix socket path for the session hub.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    base.join("quill-session.sock")
}

/// Envelope carried as the payload of a packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpEnvelope<P> {
    /// Operation name (`"handshake"`, `"call"`, ...).
    pub op: String,
    /// Logical timestamp (monotonic per sender).
    pub ts: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Protocol-level error (`op = "error"`), also embedded in a failed handshake ack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Numeric error code.
    pub code: u32,
    /// Stable identifier (e.g. `"E_BAD_PACKET"`).
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Build an error payload.
    pub fn new(code: u32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Handshake request payload (client → host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Identity the host uses as the call context actor on this connection.
    pub agent_id: Option<String>,
    /// Capability identifiers.
    pub capabilities: Vec<String>,
    /// Implementation version (not wire version).
    pub client_version: u32,
    /// Optional free-form session metadata.
    pub session_meta: Option<BTreeMap<String, String>>,
}

impl HandshakePayload {
    /// Handshake at [`PROTOCOL_VERSION`] announcing `agent_id`.
    pub fn new(agent_id: Option<String>) -> Self {
        Self {
            agent_id,
            capabilities: Vec::new(),
            client_version: PROTOCOL_VERSION,
            session_meta: None,
        }
    }
}

/// Handshake acknowledgement payload (host → client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeAckPayload {
    /// Status of the handshake.
    pub status: AckStatus,
    /// Server implementation version.
    pub server_version: u32,
    /// Capabilities enabled for this session.
    pub capabilities: Vec<String>,
    /// Session identifier assigned by the host.
    pub session_id: String,
    /// Present when `status == Error`.
    pub error: Option<ErrorPayload>,
}

/// Status enumeration for handshake ack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AckStatus {
    /// Handshake succeeded.
    #[serde(rename = "OK")]
    Ok,
    /// Handshake failed.
    #[serde(rename = "ERROR")]
    Error,
}

/// Procedure invocation (client → host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallPayload {
    /// Correlation id, echoed in the reply.
    pub id: u64,
    /// Top-level group name.
    pub group: String,
    /// Operation name within the group.
    pub operation: String,
    /// JSON input.
    pub input: Value,
}

/// Outcome carried by a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyResult {
    /// Handler output.
    Ok(Value),
    /// Classified failure.
    Err(CallError),
}

impl From<Result<Value, CallError>> for ReplyResult {
    fn from(result: Result<Value, CallError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Err(err),
        }
    }
}

impl From<ReplyResult> for Result<Value, CallError> {
    fn from(result: ReplyResult) -> Self {
        match result {
            ReplyResult::Ok(value) => Ok(value),
            ReplyResult::Err(err) => Err(err),
        }
    }
}

/// Reply to a [`CallPayload`] (host → client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyPayload {
    /// Id of the call being answered.
    pub id: u64,
    /// Outcome.
    pub result: ReplyResult,
}

/// Wire message kinds carried inside envelope payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Handshake request (op = "handshake").
    Handshake(HandshakePayload),
    /// Handshake acknowledgement (op = "handshake_ack").
    HandshakeAck(HandshakeAckPayload),
    /// Procedure invocation (op = "call").
    Call(CallPayload),
    /// Procedure outcome (op = "reply").
    Reply(ReplyPayload),
    /// Protocol or processing error (op = "error").
    Error(ErrorPayload),
}

impl Message {
    /// Canonical op string for this message variant.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::HandshakeAck(_) => "handshake_ack",
            Self::Call(_) => "call",
            Self::Reply(_) => "reply",
            Self::Error(_) => "error",
        }
    }
}
