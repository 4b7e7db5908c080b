// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`OpEnvelope`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use ciborium::value::Value as Cbor;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{Message, OpEnvelope};

/// Protocol magic constant "QWL!".
pub const MAGIC: [u8; 4] = [0x51, 0x57, 0x4c, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_LEN: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 32;
/// Largest payload a peer may send.
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the header announces.
    #[error("incomplete packet")]
    Incomplete,
    /// Magic bytes did not match.
    #[error("bad magic")]
    BadMagic,
    /// Peer speaks another wire version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    /// Announced payload exceeds [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),
    /// Checksum over header and payload did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Value could not be encoded as CBOR.
    #[error("encode: {0}")]
    Encode(String),
    /// Payload is not the expected CBOR shape.
    #[error("decode: {0}")]
    Decode(String),
    /// Envelope names an op this build does not know.
    #[error("unknown op {0}")]
    UnknownOp(String),
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Total packet length announced by a buffered header.
///
/// `Ok(None)` until [`HEADER_LEN`] bytes are available. Oversized payloads
/// fail before any of their bytes are read.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, WireError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge(len));
    }
    Ok(Some(HEADER_LEN + len + CHECKSUM_LEN))
}

/// A full packet (header + payload + checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw header.
    pub header: [u8; HEADER_LEN],
    /// CBOR payload bytes.
    pub payload: Vec<u8>,
    /// blake3 checksum over header||payload.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Packet {
    /// Build a packet around a CBOR payload.
    pub fn from_payload(payload: Vec<u8>) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
        header[8..12].copy_from_slice(&len.to_be_bytes());
        let checksum = checksum(&header, &payload);
        Ok(Self {
            header,
            payload,
            checksum,
        })
    }

    /// Serialize into contiguous bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum);
        out
    }

    /// Parse and verify one packet from the front of `bytes`.
    ///
    /// Returns the packet and the number of bytes it occupied.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let total = frame_len(bytes)?.ok_or(WireError::Incomplete)?;
        if bytes[0..4] != MAGIC {
            return Err(WireError::BadMagic);
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        if bytes.len() < total {
            return Err(WireError::Incomplete);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        let payload = &bytes[HEADER_LEN..total - CHECKSUM_LEN];
        let expect = checksum(&header, payload);
        if expect[..] != bytes[total - CHECKSUM_LEN..total] {
            return Err(WireError::ChecksumMismatch);
        }
        Ok((
            Self {
                header,
                payload: payload.to_vec(),
                checksum: expect,
            },
            total,
        ))
    }
}

/// Encode an envelope into packet bytes.
pub fn encode_envelope<P: Serialize>(env: &OpEnvelope<P>) -> Result<Vec<u8>, WireError> {
    Ok(Packet::from_payload(to_cbor(env)?)?.to_bytes())
}

fn to_cbor_value<T: Serialize>(value: &T) -> Result<Cbor, WireError> {
    Cbor::serialized(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn from_cbor_value<T: DeserializeOwned>(value: &Cbor) -> Result<T, WireError> {
    value
        .deserialized()
        .map_err(|e| WireError::Decode(e.to_string()))
}

/// Encode a [`Message`] into packet bytes with the given logical timestamp.
pub fn encode_message(msg: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    let payload = match msg {
        Message::Handshake(p) => to_cbor_value(p)?,
        Message::HandshakeAck(p) => to_cbor_value(p)?,
        Message::Call(p) => to_cbor_value(p)?,
        Message::Reply(p) => to_cbor_value(p)?,
        Message::Error(p) => to_cbor_value(p)?,
    };
    encode_envelope(&OpEnvelope {
        op: msg.op_name().to_string(),
        ts,
        payload,
    })
}

/// Decode packet bytes into `(message, ts, bytes_consumed)`.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, u64, usize), WireError> {
    let (packet, used) = Packet::parse(bytes)?;
    let env: OpEnvelope<Cbor> = from_cbor(&packet.payload)?;
    let msg = match env.op.as_str() {
        "handshake" => Message::Handshake(from_cbor_value(&env.payload)?),
        "handshake_ack" => Message::HandshakeAck(from_cbor_value(&env.payload)?),
        "call" => Message::Call(from_cbor_value(&env.payload)?),
        "reply" => Message::Reply(from_cbor_value(&env.payload)?),
        "error" => Message::Error(from_cbor_value(&env.payload)?),
        other => return Err(WireError::UnknownOp(other.to_string())),
    };
    Ok((msg, env.ts, used))
}

/// Accumulates stream bytes and yields whole packets.
///
/// Short reads never desynchronize framing: bytes stay buffered until the
/// full packet announced by the header has arrived.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    acc: Vec<u8>,
}

impl FrameBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.acc.extend_from_slice(bytes);
    }

    /// Next complete packet, if buffered.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        match frame_len(&self.acc)? {
            Some(total) if self.acc.len() >= total => Ok(Some(self.acc.drain(..total).collect())),
            _ => Ok(None),
        }
    }

    /// Bytes buffered but not yet returned.
    pub fn pending(&self) -> usize {
        self.acc.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{CallPayload, ErrorPayload, HandshakePayload, ReplyPayload, ReplyResult};
    use quill_registry_api::{CallError, FieldIssue};
    use rand::prelude::*;
    use serde_json::json;

    fn call() -> Message {
        Message::Call(CallPayload {
            id: 7,
            group: "settings".into(),
            operation: "updateSocialAuth".into(),
            input: json!({
                "enabledProviders": ["google"],
                "providerCredentials": { "google": { "clientId": "a", "clientSecret": "b" } },
                "secret": "s",
            }),
        })
    }

    #[test]
    fn call_and_reply_survive_the_wire() {
        let bytes = encode_message(&call(), 3).unwrap();
        let (msg, ts, used) = decode_message(&bytes).unwrap();
        assert_eq!(msg, call());
        assert_eq!(ts, 3);
        assert_eq!(used, bytes.len());

        let reply = Message::Reply(ReplyPayload {
            id: 7,
            result: ReplyResult::Err(CallError::validation(vec![FieldIssue::new(
                "secret",
                "too short",
            )])),
        });
        let (decoded, _, _) = decode_message(&encode_message(&reply, 4).unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn fractional_numbers_keep_their_value() {
        let reply = Message::Reply(ReplyPayload {
            id: 1,
            result: ReplyResult::Ok(json!({ "total": 1000.5, "percentageChange": -5.2 })),
        });
        let (decoded, _, _) = decode_message(&encode_message(&reply, 0).unwrap()).unwrap();
        let Message::Reply(ReplyPayload { result: ReplyResult::Ok(v), .. }) = decoded else {
            unreachable!("decoded a reply");
        };
        assert!((v["percentageChange"].as_f64().unwrap() + 5.2).abs() < 1e-12);
    }

    #[test]
    fn header_layout_is_fixed() {
        let bytes = encode_message(&Message::Error(ErrorPayload::new(1, "E", "m")), 0).unwrap();
        assert_eq!(bytes[0..4], MAGIC);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), VERSION);
        assert_eq!(
            frame_len(&bytes).unwrap(),
            Some(bytes.len()),
            "length field covers exactly the payload"
        );
    }

    #[test]
    fn corruption_is_detected() {
        let mut bytes = encode_message(&Message::Handshake(HandshakePayload::new(None)), 0).unwrap();
        assert_eq!(
            decode_message(&bytes[..bytes.len() - 1]).unwrap_err(),
            WireError::Incomplete
        );
        let mid = HEADER_LEN + 2;
        bytes[mid] ^= 0xff;
        assert_eq!(decode_message(&bytes).unwrap_err(), WireError::ChecksumMismatch);
        bytes[mid] ^= 0xff;
        bytes[0] = b'X';
        assert_eq!(decode_message(&bytes).unwrap_err(), WireError::BadMagic);
    }

    #[test]
    fn oversized_length_is_rejected_from_the_header() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(frame_len(&header), Err(WireError::PayloadTooLarge(_))));
    }

    #[test]
    fn unknown_op_is_an_error() {
        let bytes = encode_envelope(&OpEnvelope {
            op: "subscribe".to_string(),
            ts: 0,
            payload: 1u8,
        })
        .unwrap();
        assert_eq!(
            decode_message(&bytes).unwrap_err(),
            WireError::UnknownOp("subscribe".into())
        );
    }

    #[test]
    fn frame_buffer_reassembles_split_packets() {
        let a = encode_message(&call(), 1).unwrap();
        let b = encode_message(&Message::Error(ErrorPayload::new(2, "E", "x")), 2).unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut buf = FrameBuffer::new();
        buf.extend(&stream[..5]);
        assert_eq!(buf.next_packet().unwrap(), None);
        buf.extend(&stream[5..]);
        assert_eq!(buf.next_packet().unwrap(), Some(a));
        assert_eq!(buf.next_packet().unwrap(), Some(b));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn decoder_never_panics_on_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let len = rng.gen_range(0..256);
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            if rng.gen_bool(0.5) && data.len() >= 4 {
                data[0..4].copy_from_slice(&MAGIC);
            }
            let _ = decode_message(&data);
        }
    }
}
