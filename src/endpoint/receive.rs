//! Receive capability: one queue, one handler per message type.
//!
//! A [`ReceiveEndpoint`] subscribes to its queue once and runs a background
//! receive loop. Each delivery is decoded as a [`RawEnvelope`], matched
//! against the registered handlers by the envelope's `messageType` list (in
//! order), bound to the handler's payload type and handed over as a
//! [`ConsumeContext`]. Each handler invocation runs on its own task, so a
//! slow handler does not hold up unrelated deliveries.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_error,
    log_warn,
    ConsumeContext,
    EndpointAddress,
    ExchangeOverrides,
    Fault,
    FaultMessageType,
    HostAddress,
    MessageType,
    MessageTypeName,
    RawEnvelope,
    Result,
    SendEndpoint,
    TransportMessage,
    TransportPtr,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Registry of handlers keyed by message type URN.
type HandlerRegistry = Mutex<HashMap<String, Arc<dyn HandlerFn>>>;

// Type-erased async handler
trait HandlerFn: Send + Sync {
    fn call(&self, envelope: RawEnvelope, endpoint: ReceiveEndpoint)
        -> BoxFuture<'static, Result<()>>;
}

struct Handler<F, Fut, T> {
    func: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, Fut, T> HandlerFn for Handler<F, Fut, T>
where
    F: Fn(ConsumeContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    fn call(
        &self,
        envelope: RawEnvelope,
        endpoint: ReceiveEndpoint,
    ) -> BoxFuture<'static, Result<()>> {
        // ---
        let envelope = match envelope.into_typed::<T>() {
            Ok(envelope) => envelope,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.func)(ConsumeContext::new(envelope, endpoint)))
    }
}

/// A queue this process consumes from.
///
/// Cheap to clone (internally `Arc`-backed). The receive loop stops when the
/// last clone is dropped or [`stop`](Self::stop) is called.
#[derive(Clone)]
pub struct ReceiveEndpoint {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportPtr,
    address: EndpointAddress,
    handlers: HandlerRegistry,
    rx_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock_ignore_poison(&self.rx_task).take() {
            task.abort();
        }
    }
}

impl ReceiveEndpoint {
    // ---

    /// Subscribe to `address` and start the receive loop.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the subscription cannot be
    /// established.
    pub async fn new(transport: TransportPtr, address: EndpointAddress) -> Result<Self> {
        // ---
        let mut handle = transport.subscribe(&address).await?;

        let inner = Arc::new(Inner {
            transport,
            address,
            handlers: Mutex::new(HashMap::new()),
            rx_task: Mutex::new(None),
        });

        // The loop only holds a weak reference so dropping the endpoint ends it.
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let rx_task = tokio::spawn(async move {
            // ---
            while let Some(msg) = handle.inbox.recv().await {
                match weak.upgrade() {
                    Some(inner) => ReceiveEndpoint { inner }.dispatch(msg),
                    None => break,
                }
            }
            log_debug!("receive loop stopped");
        });

        *lock_ignore_poison(&inner.rx_task) = Some(rx_task);

        log_debug!("receive endpoint started on {}", inner.address);
        Ok(Self { inner })
    }

    /// Endpoint on a uniquely named, non-durable, auto-deleted queue.
    ///
    /// Used as the reply address of request clients.
    pub async fn temporary(transport: TransportPtr) -> Result<Self> {
        // ---
        let name = format!("bus-{}", Uuid::new_v4().simple());
        let address = EndpointAddress::for_exchange(
            transport.host_address(),
            name,
            ExchangeOverrides::temporary(),
        );
        Self::new(transport, address).await
    }

    /// This endpoint's own canonical address.
    pub fn address(&self) -> &EndpointAddress {
        &self.inner.address
    }

    /// Base location for resolving foreign addresses.
    pub fn host_address(&self) -> &HostAddress {
        self.inner.transport.host_address()
    }

    pub fn transport(&self) -> &TransportPtr {
        &self.inner.transport
    }

    /// Send capability for `address`, stamped with this endpoint as source.
    pub fn send_endpoint(&self, address: EndpointAddress) -> SendEndpoint {
        SendEndpoint::new(self.inner.transport.clone(), address)
            .with_source(self.inner.address.clone())
    }

    /// Register the handler for `message_type`.
    ///
    /// Each type has at most one handler; registering again replaces it.
    pub fn handle<T, F, Fut>(&self, message_type: &MessageType, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(ConsumeContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            message_type.urn(),
            Arc::new(Handler::<F, Fut, T> {
                func: handler,
                _phantom: PhantomData,
            }),
        );
    }

    /// Register the handler for faults of a message type.
    pub fn handle_fault<F, Fut>(&self, fault_type: &FaultMessageType, handler: F)
    where
        F: Fn(ConsumeContext<Fault>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            fault_type.urn(),
            Arc::new(Handler::<F, Fut, Fault> {
                func: handler,
                _phantom: PhantomData,
            }),
        );
    }

    /// Whether a handler is registered for `message_type`.
    pub fn handles(&self, message_type: &dyn MessageTypeName) -> bool {
        lock_ignore_poison(&self.inner.handlers).contains_key(&message_type.urn())
    }

    /// Stop the receive loop. Handlers already running finish normally.
    pub fn stop(&self) {
        if let Some(task) = lock_ignore_poison(&self.inner.rx_task).take() {
            task.abort();
        }
    }

    fn register(&self, urn: String, handler: Arc<dyn HandlerFn>) {
        // ---
        let mut handlers = lock_ignore_poison(&self.inner.handlers);
        if handlers.insert(urn.clone(), handler).is_some() {
            log_warn!("replaced handler for {urn} on {}", self.inner.address);
        }
    }

    fn dispatch(&self, msg: TransportMessage) {
        // ---
        let envelope = match RawEnvelope::from_slice(&msg.body) {
            Ok(envelope) => envelope,
            Err(_e) => {
                log_warn!("{}: dropping undecodable message: {_e}", self.inner.address);
                return;
            }
        };

        if let Some(expires) = envelope.expiration_time {
            if expires <= Utc::now() {
                log_debug!(
                    "{}: dropping expired message {:?}",
                    self.inner.address,
                    envelope.message_id
                );
                return;
            }
        }

        let handler = {
            let handlers = lock_ignore_poison(&self.inner.handlers);
            envelope
                .message_type
                .iter()
                .find_map(|urn| handlers.get(urn).cloned())
        };

        let Some(handler) = handler else {
            log_debug!(
                "{}: no handler for {:?}",
                self.inner.address,
                envelope.message_type
            );
            return;
        };

        let endpoint = self.clone();
        tokio::spawn(async move {
            if let Err(_e) = handler.call(envelope, endpoint).await {
                log_error!("handler error: {_e}");
            }
        });
    }
}
