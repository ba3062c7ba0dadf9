//! Message envelope and wire format.
//!
//! Every message travels inside a [`MessageEnvelope`]: identity, correlation
//! linkage, addressing, typing, timing and free-form headers around the
//! payload. The serialized form is the MassTransit JSON envelope, camelCase
//! keys with the payload under `message`:
//!
//! ```json
//! {
//!   "messageId": "…",
//!   "requestId": "…",
//!   "responseAddress": "rabbitmq://localhost/bus-…?temporary=true",
//!   "messageType": ["urn:message:Sales:SubmitOrder"],
//!   "sentTime": "2024-01-01T00:00:00Z",
//!   "message": { … }
//! }
//! ```
//!
//! Inbound envelopes are first decoded as [`RawEnvelope`] (payload kept as a
//! JSON value) so they can be dispatched on `messageType` before the handler
//! picks a concrete payload type.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::new_message_id;
use crate::message_type::MessageTypeName;
use crate::{Result, RpcError};

/// Content type of serialized envelopes.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/vnd.masstransit+json";

/// Envelope whose payload has not been bound to a concrete type yet.
pub type RawEnvelope = MessageEnvelope<Value>;

/// Metadata plus payload of a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope<T> {
    // --- identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_id: Option<String>,

    // --- correlation and addressing
    /// Set by a requester, echoed unchanged by the responder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    /// Where a responder should send its reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_address: Option<String>,
    /// Where a responder should send a fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_address: Option<String>,

    // --- typing
    /// Canonical type names, most specific first.
    #[serde(default)]
    pub message_type: Vec<String>,

    // --- timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,

    // --- opaque metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,

    /// Message body.
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    // ---

    /// Outbound envelope with a fresh message id, the current time and this
    /// process's host descriptor. Every other field starts empty.
    pub fn new(message: T) -> Self {
        Self {
            message_id: Some(new_message_id()),
            correlation_id: None,
            conversation_id: None,
            initiator_id: None,
            request_id: None,
            source_address: None,
            destination_address: None,
            response_address: None,
            fault_address: None,
            message_type: Vec::new(),
            sent_time: Some(Utc::now()),
            expiration_time: None,
            headers: Map::new(),
            host: Some(HostInfo::current()),
            message,
        }
    }

    /// Replace the type list with the names of `message_type`.
    pub fn set_message_type(&mut self, message_type: &dyn MessageTypeName) {
        self.message_type = message_type.to_message_type();
    }

    /// Whether the envelope self-describes as `urn`.
    pub fn supports(&self, urn: &str) -> bool {
        self.message_type.iter().any(|t| t == urn)
    }

    /// Set a header value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// Expire the message `ttl` after its sent time (or now, if unsent).
    pub fn expire_after(&mut self, ttl: Duration) {
        let base = self.sent_time.unwrap_or_else(Utc::now);
        self.expiration_time = chrono::Duration::from_std(ttl).ok().map(|ttl| base + ttl);
    }

    /// Apply `f` to the payload, keeping all metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MessageEnvelope<U> {
        MessageEnvelope {
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            conversation_id: self.conversation_id,
            initiator_id: self.initiator_id,
            request_id: self.request_id,
            source_address: self.source_address,
            destination_address: self.destination_address,
            response_address: self.response_address,
            fault_address: self.fault_address,
            message_type: self.message_type,
            sent_time: self.sent_time,
            expiration_time: self.expiration_time,
            headers: self.headers,
            host: self.host,
            message: f(self.message),
        }
    }
}

impl<T: Serialize> MessageEnvelope<T> {
    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

impl RawEnvelope {
    /// Decode the JSON wire form without binding the payload type.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidEnvelope`] if the bytes are not a JSON
    /// envelope object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::InvalidEnvelope(e.to_string()))
    }

    /// Bind the payload to a concrete type.
    pub fn into_typed<T: DeserializeOwned>(mut self) -> Result<MessageEnvelope<T>> {
        // ---
        let body = std::mem::take(&mut self.message);
        let typed: T = serde_json::from_value(body)?;
        Ok(self.map(|_| typed))
    }
}

/// Identity of the process that produced a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_transit_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system_version: Option<String>,
}

impl HostInfo {
    /// Descriptor of the running process.
    pub fn current() -> Self {
        // ---
        let machine_name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok();

        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()));

        Self {
            machine_name,
            process_name,
            process_id: Some(std::process::id()),
            assembly: Some(env!("CARGO_PKG_NAME").to_string()),
            assembly_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            mass_transit_version: None,
            operating_system_version: Some(std::env::consts::OS.to_string()),
        }
    }
}

/// Delivery options recognised by a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the broker to persist the message. Defaults to `true`.
    pub persistent: bool,
    /// Discard the message if not consumed within this duration.
    pub expiration: Option<Duration>,
}

impl SendOptions {
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            expiration: None,
        }
    }
}

/// Details of one exception carried in a [`Fault`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ExceptionInfo {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            stack_trace: None,
            source: None,
        }
    }
}

/// Application-level failure reply.
///
/// Sent by a responder in place of a response, typed with the fault wrapper
/// of the request's message type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_id: Option<String>,
    /// Id of the message that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faulted_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,
    /// The message that failed, as received.
    #[serde(default)]
    pub message: Value,
}

impl Fault {
    /// Fault for `faulted_message_id`, carrying the original message body.
    pub fn new(
        faulted_message_id: Option<String>,
        message: Value,
        exceptions: Vec<ExceptionInfo>,
    ) -> Self {
        Self {
            fault_id: Some(new_message_id()),
            faulted_message_id,
            timestamp: Some(Utc::now()),
            exceptions,
            host: Some(HostInfo::current()),
            message,
        }
    }

    /// Message of the first recorded exception.
    pub fn reason(&self) -> Option<&str> {
        self.exceptions.first().map(|e| e.message.as_str())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exceptions.first() {
            Some(e) if e.exception_type.is_empty() => f.write_str(&e.message),
            Some(e) => write!(f, "{}: {}", e.exception_type, e.message),
            None => f.write_str("fault without exception details"),
        }
    }
}
