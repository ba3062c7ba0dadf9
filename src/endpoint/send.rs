//! Send capability bound to one destination.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    // ---
    log_debug,
    EndpointAddress,
    MessageEnvelope,
    MessageTypeFactory,
    Result,
    SendOptions,
    TransportMessage,
    TransportPtr,
    ENVELOPE_CONTENT_TYPE,
};

/// Sends enveloped messages to a single destination exchange.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct SendEndpoint {
    transport: TransportPtr,
    address: EndpointAddress,
    source_address: Option<EndpointAddress>,
    type_factory: MessageTypeFactory,
}

impl SendEndpoint {
    // ---

    /// Send endpoint for `address`.
    ///
    /// The process-wide default namespace is captured now; it names payloads
    /// whose envelope leaves `messageType` empty.
    pub fn new(transport: TransportPtr, address: EndpointAddress) -> Self {
        Self {
            transport,
            address,
            source_address: None,
            type_factory: MessageTypeFactory::from_default(),
        }
    }

    /// Stamp outgoing envelopes with `source` as their `sourceAddress`.
    pub fn with_source(mut self, source: EndpointAddress) -> Self {
        self.source_address = Some(source);
        self
    }

    /// Name fallback message types in the factory's namespace.
    pub fn with_type_factory(mut self, factory: MessageTypeFactory) -> Self {
        self.type_factory = factory;
        self
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Send `message` with default envelope fields.
    pub async fn send<T: Serialize>(&self, message: T, options: &SendOptions) -> Result<()> {
        self.send_with(message, options, |_| {}).await
    }

    /// Send `message`, letting `mutate` adjust the envelope just before it
    /// is serialized.
    ///
    /// If the envelope still has no `messageType` after `mutate`, the short
    /// Rust type name of `T` is used in this endpoint's namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`](crate::RpcError::Serialization)
    /// if the envelope cannot be encoded, or the transport's error if the
    /// send fails.
    pub async fn send_with<T, F>(&self, message: T, options: &SendOptions, mutate: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&mut MessageEnvelope<T>),
    {
        // ---
        let body = {
            let mut envelope = MessageEnvelope::new(message);
            envelope.destination_address = Some(self.address.to_string());
            envelope.source_address = self.source_address.as_ref().map(|a| a.to_string());
            if let Some(ttl) = options.expiration {
                envelope.expire_after(ttl);
            }

            mutate(&mut envelope);

            if envelope.message_type.is_empty() {
                let fallback = self.type_factory.message_type(short_type_name::<T>());
                envelope.set_message_type(&fallback);
            }

            log_debug!(
                "send {:?} to {} (message_id: {:?}, request_id: {:?})",
                envelope.message_type,
                self.address,
                envelope.message_id,
                envelope.request_id
            );

            envelope.to_bytes()?
        };

        self.transport
            .send(TransportMessage {
                destination: self.address.clone(),
                body,
                options: options.clone(),
                content_type: Arc::from(ENVELOPE_CONTENT_TYPE),
            })
            .await
    }
}

/// Last path segment of `T`'s type name, generic arguments removed.
fn short_type_name<T>() -> &'static str {
    // ---
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
