//! Receive-side view of an envelope.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{
    // ---
    log_debug,
    log_warn,
    EndpointAddress,
    ExceptionInfo,
    ExchangeOverrides,
    Fault,
    MessageEnvelope,
    MessageType,
    MessageTypeName,
    ReceiveEndpoint,
    Result,
    SendOptions,
};

/// An inbound message together with the endpoint that received it.
///
/// Dereferences to the [`MessageEnvelope`], so metadata is available as
/// plain fields (`ctx.request_id`, `ctx.headers`, ...).
///
/// The reply helpers take their own message type parameter: a response or
/// published event does not have to match the inbound message's type.
pub struct ConsumeContext<T> {
    envelope: MessageEnvelope<T>,
    receive_endpoint: ReceiveEndpoint,
}

impl<T> ConsumeContext<T> {
    // ---

    pub(crate) fn new(envelope: MessageEnvelope<T>, receive_endpoint: ReceiveEndpoint) -> Self {
        Self {
            envelope,
            receive_endpoint,
        }
    }

    /// The payload.
    pub fn message(&self) -> &T {
        &self.envelope.message
    }

    pub fn envelope(&self) -> &MessageEnvelope<T> {
        &self.envelope
    }

    pub fn into_message(self) -> T {
        self.envelope.message
    }

    pub fn into_envelope(self) -> MessageEnvelope<T> {
        self.envelope
    }

    /// The endpoint this message arrived on.
    pub fn receive_endpoint(&self) -> &ReceiveEndpoint {
        &self.receive_endpoint
    }

    /// Reply to the requester.
    ///
    /// See [`respond_with`](Self::respond_with).
    pub async fn respond<R: Serialize>(&self, message: R) -> Result<()> {
        self.respond_with(message, |_| {}).await
    }

    /// Reply to the requester, adjusting the outgoing envelope with `mutate`.
    ///
    /// The reply goes to the inbound `responseAddress`, resolved relative to
    /// the receiving endpoint's host, and carries the inbound `requestId` so
    /// the requester can correlate it. When the inbound envelope has no
    /// response address this does nothing and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AddressParse`](crate::RpcError::AddressParse) if
    /// the response address cannot be resolved, or the send error.
    pub async fn respond_with<R, F>(&self, message: R, mutate: F) -> Result<()>
    where
        R: Serialize,
        F: FnOnce(&mut MessageEnvelope<R>),
    {
        // ---
        let Some(raw) = self.envelope.response_address.as_deref() else {
            log_debug!(
                "no response address on {:?}, respond skipped",
                self.envelope.message_id
            );
            return Ok(());
        };

        let address = EndpointAddress::parse(self.receive_endpoint.host_address(), raw)?;
        let request_id = self.envelope.request_id.clone();

        self.reply(address, message, move |env| {
            env.request_id = request_id;
            mutate(env);
        })
        .await
    }

    /// Broadcast `message` to `exchange`.
    ///
    /// See [`publish_with`](Self::publish_with).
    pub async fn publish<R: Serialize>(&self, message: R, exchange: &str) -> Result<()> {
        self.publish_with(message, exchange, |_| {}).await
    }

    /// Broadcast `message` to `exchange`, adjusting the envelope with
    /// `mutate`.
    ///
    /// Always sends. The destination is built from the exchange name on the
    /// receiving endpoint's host; no `requestId` is carried over.
    pub async fn publish_with<R, F>(&self, message: R, exchange: &str, mutate: F) -> Result<()>
    where
        R: Serialize,
        F: FnOnce(&mut MessageEnvelope<R>),
    {
        // ---
        let address = EndpointAddress::for_exchange(
            self.receive_endpoint.host_address(),
            exchange,
            ExchangeOverrides::default(),
        );
        self.reply(address, message, mutate).await
    }

    async fn reply<R, F>(&self, address: EndpointAddress, message: R, mutate: F) -> Result<()>
    where
        R: Serialize,
        F: FnOnce(&mut MessageEnvelope<R>),
    {
        // ---
        let conversation_id = self.envelope.conversation_id.clone();
        let initiator_id = self.envelope.message_id.clone();

        self.receive_endpoint
            .send_endpoint(address)
            .send_with(message, &SendOptions::default(), move |env| {
                env.conversation_id = conversation_id;
                env.initiator_id = initiator_id;
                mutate(env);
            })
            .await
    }
}

impl<T: Serialize> ConsumeContext<T> {
    /// Report that handling this message failed.
    ///
    /// Sends a [`Fault`] carrying the inbound message to the inbound
    /// `faultAddress`, or to `responseAddress` when no fault address was
    /// given, typed as the fault of the inbound message type and carrying
    /// the inbound `requestId`. Does nothing when neither address is
    /// present, or when the inbound message has no plain message type (for
    /// example when it is itself a fault).
    pub async fn respond_fault(&self, exception: ExceptionInfo) -> Result<()> {
        // ---
        let raw = match (&self.envelope.fault_address, &self.envelope.response_address) {
            (Some(fault), _) => fault.as_str(),
            (None, Some(response)) => response.as_str(),
            (None, None) => {
                log_debug!(
                    "no fault or response address on {:?}, fault skipped",
                    self.envelope.message_id
                );
                return Ok(());
            }
        };

        let address = EndpointAddress::parse(self.receive_endpoint.host_address(), raw)?;
        let fault = Fault::new(
            self.envelope.message_id.clone(),
            serde_json::to_value(&self.envelope.message)?,
            vec![exception],
        );

        let fault_types: Vec<String> = self
            .envelope
            .message_type
            .iter()
            .filter_map(|urn| MessageType::parse_urn(urn))
            .map(|mt| mt.fault().urn())
            .collect();
        if fault_types.is_empty() {
            log_warn!(
                "{:?} has no plain message type to fault, fault skipped",
                self.envelope.message_id
            );
            return Ok(());
        }

        let request_id = self.envelope.request_id.clone();

        self.reply(address, fault, move |env| {
            env.request_id = request_id;
            env.message_type = fault_types;
        })
        .await
    }
}

impl ConsumeContext<Value> {
    /// Bind the raw payload to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`](crate::RpcError::Serialization)
    /// if the payload does not decode as `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ConsumeContext<T>> {
        // ---
        let envelope = self.envelope.into_typed()?;
        Ok(ConsumeContext::new(envelope, self.receive_endpoint))
    }
}

impl<T> Deref for ConsumeContext<T> {
    type Target = MessageEnvelope<T>;

    fn deref(&self) -> &Self::Target {
        &self.envelope
    }
}
