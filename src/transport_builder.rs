//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports with clear separation
//! between required and optional configuration.

use std::sync::Arc;

use crate::{
    // ---
    create_lapin_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
    Result,
    RpcError,
    TransportConfig,
    TransportPtr,
};

/// Builder for creating transport instances.
///
/// # Examples
///
/// ## Broker transport
/// ```no_run
/// use masstransit_rpc::TransportBuilder;
///
/// # async fn example() -> masstransit_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("order-service")
///     .transport_type("lapin")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Isolated in-memory transport
/// ```
/// use masstransit_rpc::{MemoryHub, TransportBuilder};
///
/// # async fn example() -> masstransit_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let transport = TransportBuilder::new()
///     .uri("rabbitmq://localhost/")
///     .node_id("test-node")
///     .memory_hub(hub)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    transport_type: Option<String>,
    hub: Option<Arc<MemoryHub>>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker URI (required).
    ///
    /// Examples:
    /// - `"rabbitmq://localhost/"`
    /// - `"amqp://localhost:5672/%2f"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required).
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set explicit transport type.
    ///
    /// Valid values: `"memory"`, `"lapin"`
    ///
    /// If not specified, uses feature-flag driven selection.
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Route an in-memory transport through `hub` instead of the
    /// process-global one.
    pub fn memory_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Required fields missing (`uri`, `node_id`)
    /// - A memory hub is combined with a non-memory transport type
    /// - The transport type is unknown
    /// - Transport creation fails
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let uri = self
            .uri
            .ok_or_else(|| RpcError::MissingConfig("uri".into()))?;
        let node_id = self
            .node_id
            .ok_or_else(|| RpcError::MissingConfig("node_id".into()))?;

        if let (Some(_), Some(kind)) = (&self.hub, self.transport_type.as_deref()) {
            if kind != "memory" {
                return Err(RpcError::ConfigConflict(format!(
                    "memory_hub cannot be used with transport_type {kind}"
                )));
            }
        }

        let config = TransportConfig {
            uri,
            node_id,
            transport_type: self.transport_type.clone(),
        };

        if let Some(hub) = self.hub {
            return create_memory_transport_with_hub(config, hub).await;
        }

        // Dispatch to the appropriate transport factory.
        //
        // When transport_type is explicit, use it directly. When None, try
        // lapin first; a disabled transport returns Err immediately via its
        // stub, so memory is the unconditional fallback.
        match self.transport_type.as_deref() {
            Some("lapin") => create_lapin_transport(config).await,
            Some("memory") => create_memory_transport(config).await,
            Some(other) => Err(RpcError::Transport(format!(
                "unrecognized transport_type: {other}, valid values: memory, lapin"
            ))),
            None => {
                if let Ok(t) = create_lapin_transport(config.clone()).await {
                    return Ok(t);
                }
                create_memory_transport(config).await
            }
        }
    }
}
