// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! Defines the interface the correlation layer uses to move serialized
//! envelopes between endpoints. It avoids any reference to concrete
//! protocols or client libraries; implementations live under
//! `src/transport/`.
//!
//! The transport only delivers opaque bodies to exchanges and from queues.
//! Envelope decoding, type dispatch, request correlation and timeouts are
//! handled above it.
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{EndpointAddress, HostAddress, Result, SendOptions};

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` and returns
/// it from [`Transport::base`], so the default trait methods can delegate
/// here.
#[derive(Debug, Clone)]
pub struct TransportBase {
    /// Unique identifier for this transport instance, used for logging.
    pub transport_id: String,
    /// Broker scope this transport is connected to.
    pub host: HostAddress,
}

impl TransportBase {
    pub fn new(transport_id: impl Into<String>, host: HostAddress) -> Self {
        Self {
            transport_id: transport_id.into(),
            host,
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Passed to the transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"rabbitmq://localhost/"`, `"amqp://localhost:5672/%2f"`).
    pub uri: String,
    /// Identifier for this transport instance.
    pub node_id: String,
    /// Optional transport type override (`"memory"`, `"lapin"`).
    /// If `None`, uses feature-flag driven selection.
    pub transport_type: Option<String>,
}

/// A serialized message on its way to, or arriving from, the broker.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Exchange the message is sent to (outbound), or the endpoint whose
    /// queue delivered it (inbound).
    pub destination: EndpointAddress,
    /// Serialized envelope.
    pub body: Bytes,
    /// Delivery options requested by the sender.
    pub options: SendOptions,
    /// MIME type of `body`.
    pub content_type: Arc<str>,
}

/// Handle returned from a successful subscription.
///
/// Dropping the handle closes the inbox; the transport stops delivering to
/// it on the next attempt.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for messages arriving at the subscribed endpoint.
    pub inbox: mpsc::Receiver<TransportMessage>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - once `subscribe()` returns, messages sent *after* that point to the
///   endpoint's exchange are deliverable to the returned inbox;
/// - `send()` does not wait for subscribers to process the message.
///
/// The in-memory transport serves as the reference implementation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Broker scope, used to resolve addresses found in envelopes.
    fn host_address(&self) -> &HostAddress {
        &self.base().host
    }

    /// Send a serialized message to `msg.destination`.
    async fn send(&self, msg: TransportMessage) -> Result<()>;

    /// Declare `endpoint`'s exchange and queue, bind them, and start
    /// receiving from the queue.
    async fn subscribe(&self, endpoint: &EndpointAddress) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// Cheap to clone; every clone shares the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;
