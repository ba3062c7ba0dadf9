//! Request/response correlation over message-broker exchanges
//!
//! This library layers MassTransit-compatible request/response semantics on
//! top of a pub/sub broker. It names message types as URNs, resolves
//! endpoint addresses relative to a broker host, wraps payloads in the
//! MassTransit JSON envelope, and correlates each outgoing request with the
//! response, fault, or timeout that settles it.
//!
//! Typical wiring:
//!
//! - a [`Transport`] (in-memory, or RabbitMQ with the `transport_lapin`
//!   feature), built with [`TransportBuilder`];
//! - a [`ReceiveEndpoint`] per consumed queue, with handlers registered by
//!   [`MessageType`];
//! - a [`RequestClient`] for each request/response pair, replying through a
//!   [`ConsumeContext`] on the responder side.
//!

use std::sync::{Mutex, MutexGuard};

// Import all sub modules once...
mod macros;

mod address;
mod client;
mod config;
mod consume_context;
mod correlation;
mod domain;
mod endpoint;
mod envelope;
mod error;
mod message_type;
mod transport;
mod transport_builder;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::RequestClient;
pub use consume_context::ConsumeContext;
pub use endpoint::{ReceiveEndpoint, SendEndpoint};

pub use config::RequestConfig;
pub use transport_builder::TransportBuilder;

pub use correlation::RequestId;
pub use error::{Result, RpcError};

pub use address::{EndpointAddress, ExchangeOverrides, HostAddress};

pub use envelope::{
    //
    ExceptionInfo,
    Fault,
    HostInfo,
    MessageEnvelope,
    RawEnvelope,
    SendOptions,
    ENVELOPE_CONTENT_TYPE,
};

pub use message_type::{
    //
    default_namespace,
    set_default_namespace,
    FaultMessageType,
    MessageType,
    MessageTypeFactory,
    MessageTypeName,
    DEFAULT_NAMESPACE,
};

pub use transport::{
    //
    create_lapin_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
    MEMORY_DEFAULT_HOST,
};

// --- public re-exports
pub use domain::{
    //
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportMessage,
    TransportPtr,
};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
