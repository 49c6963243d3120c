//! # Commit Messages
//!
//! The single wire envelope exchanged between nodes for one transaction.
//!
//! ```text
//! {
//!   "host":      "<coordinator address>",
//!   "ip":        "<subject address: coordinator for prepare, voter for response>",
//!   "type":      "prepare" | "response",
//!   "commit_id": "<canonical uuid>",
//!   "payload":   ["<participant>", ...] | true | false,
//!   "timeout":   <milliseconds, prepare only>
//! }
//! ```
//!
//! The payload shape depends on `type`. Decoding reads it as a raw JSON
//! value first and only builds the typed [`Signal`] once the shape has been
//! checked against the declared type, so a malformed message never reaches
//! a commit.

use serde::{Deserialize, Serialize};
use shared_types::{Address, CommitId};
use std::time::Duration;
use thiserror::Error;

/// Errors produced while decoding a wire message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Body is not JSON or does not match the envelope layout.
    #[error("JSON format does not match the commit envelope: {0}")]
    Format(#[from] serde_json::Error),

    /// `type` is neither `prepare` nor `response`.
    #[error("Invalid signal type: {0}")]
    InvalidType(String),

    /// Payload shape does not match the declared type.
    #[error("Invalid payload for {kind:?} message: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },

    /// Prepare message without a timeout.
    #[error("Prepare message is missing its timeout")]
    MissingTimeout,
}

/// Message type tag carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Coordinator proposes a transaction.
    Prepare,
    /// A participant's vote.
    Response,
}

impl MessageKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Prepare => "prepare",
            MessageKind::Response => "response",
        }
    }
}

/// Typed payload of a commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Phase one: every listed participant is expected to vote before `timeout`.
    Prepare {
        participants: Vec<Address>,
        timeout: Duration,
    },
    /// A vote; `ok == false` aborts the transaction.
    Response { ok: bool },
}

impl Signal {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Signal::Prepare { .. } => MessageKind::Prepare,
            Signal::Response { .. } => MessageKind::Response,
        }
    }
}

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    /// Address of the coordinator that started the transaction.
    pub host: Address,
    /// Subject address. For responses this is the voter.
    pub ip: Address,
    /// Transaction this message belongs to.
    pub commit_id: CommitId,
    /// Type-checked payload.
    pub signal: Signal,
}

/// Envelope as it appears on the wire, payload still untyped.
#[derive(Debug, Serialize, Deserialize)]
struct RawMessage {
    #[serde(default)]
    host: Address,
    ip: Address,
    #[serde(rename = "type")]
    kind: String,
    commit_id: CommitId,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

/// Round `timeout` up to the whole milliseconds it travels as.
///
/// A non-zero deadline never collapses to zero, which would read as "no
/// deadline" on the receiving side.
#[must_use]
pub fn wire_timeout(timeout: Duration) -> Duration {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

impl CommitMessage {
    /// Build a prepare message sent by coordinator `host`.
    ///
    /// `timeout` is rounded up with [`wire_timeout`].
    pub fn prepare(
        host: impl Into<Address>,
        commit_id: CommitId,
        participants: Vec<Address>,
        timeout: Duration,
    ) -> Self {
        let host = host.into();
        Self {
            ip: host.clone(),
            host,
            commit_id,
            signal: Signal::Prepare {
                participants,
                timeout: wire_timeout(timeout),
            },
        }
    }

    /// Build a vote cast on behalf of `voter`.
    pub fn response(
        host: impl Into<Address>,
        voter: impl Into<Address>,
        commit_id: CommitId,
        ok: bool,
    ) -> Self {
        Self {
            host: host.into(),
            ip: voter.into(),
            commit_id,
            signal: Signal::Response { ok },
        }
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.signal.kind()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let (payload, timeout) = match &self.signal {
            Signal::Prepare {
                participants,
                timeout,
            } => (
                serde_json::to_value(participants)?,
                Some(u64::try_from(wire_timeout(*timeout).as_millis()).unwrap_or(u64::MAX)),
            ),
            Signal::Response { ok } => (serde_json::Value::Bool(*ok), None),
        };

        let raw = RawMessage {
            host: self.host.clone(),
            ip: self.ip.clone(),
            kind: self.kind().as_str().to_string(),
            commit_id: self.commit_id,
            payload,
            timeout,
        };
        Ok(serde_json::to_vec(&raw)?)
    }

    /// Parse and validate a wire message.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let raw: RawMessage = serde_json::from_slice(bytes)?;

        let signal = match raw.kind.as_str() {
            "prepare" => Signal::Prepare {
                participants: participants_from(raw.payload)?,
                timeout: Duration::from_millis(raw.timeout.ok_or(MessageError::MissingTimeout)?),
            },
            "response" => match raw.payload {
                serde_json::Value::Bool(ok) => Signal::Response { ok },
                other => {
                    return Err(MessageError::InvalidPayload {
                        kind: MessageKind::Response,
                        reason: format!("expected a boolean, got {}", json_type(&other)),
                    })
                }
            },
            other => return Err(MessageError::InvalidType(other.to_string())),
        };

        Ok(Self {
            host: raw.host,
            ip: raw.ip,
            commit_id: raw.commit_id,
            signal,
        })
    }
}

fn participants_from(payload: serde_json::Value) -> Result<Vec<Address>, MessageError> {
    let items = match payload {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(MessageError::InvalidPayload {
                kind: MessageKind::Prepare,
                reason: format!("expected an array of addresses, got {}", json_type(&other)),
            })
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(address) => Ok(address),
            other => Err(MessageError::InvalidPayload {
                kind: MessageKind::Prepare,
                reason: format!("participant must be a string, got {}", json_type(&other)),
            }),
        })
        .collect()
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
