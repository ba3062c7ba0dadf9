//! In-memory transport implementation.
//!
//! A pure in-process implementation of the domain-level `Transport` trait,
//! intended for tests, local execution, and as the reference for transport
//! semantics.
//!
//! ## Reference Semantics
//!
//! - Every endpoint is a fanout exchange bound to a queue of the same name.
//!   A send to exchange `X` reaches every subscriber of endpoint `X`.
//! - Once `subscribe()` returns successfully, messages sent *after* that
//!   point are deliverable.
//! - Delivery is deterministic within a single process; nothing is dropped
//!   due to timing or background IO.
//! - Sends to an exchange with no subscribers are discarded, as a broker
//!   discards messages routed to an unbound exchange.
//!
//! ## Non-Goals
//!
//! No persistence, expiration or redelivery. `SendOptions` are carried
//! through to subscribers unchanged.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    log_info,
    EndpointAddress,
    HostAddress,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportMessage,
    TransportPtr,
};

/// Host used when a memory transport is configured without a URI.
pub const MEMORY_DEFAULT_HOST: &str = "rabbitmq://localhost/";

const INBOX_CAPACITY: usize = 64;

/// A subscriber registered on the hub, tagged with its owning transport.
struct Subscriber {
    transport_id: String,
    tx: mpsc::Sender<TransportMessage>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. All memory transports that
/// share a `MemoryHub` can send to each other's endpoints, exactly as
/// processes connected to the same broker would.
///
/// # Testing
///
/// For isolation between parallel test cases, construct a hub explicitly
/// and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use masstransit_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> masstransit_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let config = TransportConfig {
///     uri: "rabbitmq://localhost/".into(),
///     node_id: "client".into(),
///     transport_type: None,
/// };
/// let transport = masstransit_rpc::create_memory_transport_with_hub(config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    exchanges: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn send(&self, transport_id: &str, msg: TransportMessage) -> Result<()> {
        // ---
        let exchange = msg.destination.name().to_string();

        // Prune dropped subscriptions, then clone senders out so no lock is
        // held while awaiting channel capacity.
        let senders: Vec<mpsc::Sender<TransportMessage>> = {
            let mut exchanges = self.exchanges.write().await;
            match exchanges.get_mut(&exchange) {
                Some(subs) => {
                    subs.retain(|s| !s.tx.is_closed());
                    let senders = subs.iter().map(|s| s.tx.clone()).collect();
                    if subs.is_empty() {
                        exchanges.remove(&exchange);
                    }
                    senders
                }
                None => Vec::new(),
            }
        };

        if senders.is_empty() {
            log_debug!("{transport_id}: no subscribers for exchange {exchange}, message discarded");
            return Ok(());
        }

        log_debug!("{transport_id}: send to {exchange} ({} subscribers)", senders.len());

        for tx in senders {
            // A closed channel indicates a SubscriptionHandle dropped mid-send.
            if let Err(_err) = tx.send(msg.clone()).await {
                log_debug!("{transport_id}: subscriber of {exchange} gone: {_err}");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        transport_id: &str,
        endpoint: &EndpointAddress,
    ) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{transport_id}: subscribe to {endpoint}");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut exchanges = self.exchanges.write().await;
        exchanges
            .entry(endpoint.name().to_string())
            .or_default()
            .push(Subscriber {
                transport_id: transport_id.to_string(),
                tx,
            });

        Ok(SubscriptionHandle { inbox: rx })
    }

    /// Remove every subscription owned by `transport_id`.
    async fn close(&self, transport_id: &str) -> Result<()> {
        // ---
        log_debug!("{transport_id}: closing transport...");

        let mut exchanges = self.exchanges.write().await;
        for subs in exchanges.values_mut() {
            subs.retain(|s| s.transport_id != transport_id);
        }
        exchanges.retain(|_, subs| !subs.is_empty());
        Ok(())
    }

    /// Number of subscriptions registered on `exchange`.
    ///
    /// Subscriptions whose handle was dropped stay registered until the next
    /// send to `exchange` prunes them.
    pub async fn subscriber_count(&self, exchange: &str) -> usize {
        let exchanges = self.exchanges.read().await;
        exchanges.get(exchange).map_or(0, Vec::len)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            exchanges: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send(&self, msg: TransportMessage) -> Result<()> {
        // ---
        if !msg.destination.host().same_scope(self.host_address()) {
            return Err(RpcError::Transport(format!(
                "destination {} is outside {}",
                msg.destination,
                self.host_address()
            )));
        }
        self.hub.send(self.transport_id(), msg).await
    }

    async fn subscribe(&self, endpoint: &EndpointAddress) -> Result<SubscriptionHandle> {
        self.hub.subscribe(self.transport_id(), endpoint).await
    }

    /// Removes only this transport's subscriptions from the hub.
    async fn close(&self) -> Result<()> {
        self.hub.close(self.transport_id()).await
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Returns [`RpcError::AddressParse`] if `config.uri` is not a valid host
/// address.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// An empty `config.uri` selects [`MEMORY_DEFAULT_HOST`].
///
/// # Errors
///
/// Returns [`RpcError::AddressParse`] if `config.uri` is not a valid host
/// address.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_info!("{}: create memory transport", config.node_id);

    let uri = if config.uri.trim().is_empty() {
        MEMORY_DEFAULT_HOST
    } else {
        config.uri.as_str()
    };

    let transport = MemoryTransport {
        base: TransportBase::new(config.node_id, HostAddress::parse(uri)?),
        hub,
    };

    Ok(Arc::new(transport))
}
