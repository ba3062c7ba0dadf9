// tests/common/mod.rs
//
// Shared fixtures: order-status messages and an isolated memory bus.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use masstransit_rpc::{
    // ---
    create_memory_transport_with_hub,
    ConsumeContext,
    EndpointAddress,
    ExchangeOverrides,
    MemoryHub,
    MessageType,
    ReceiveEndpoint,
    RequestClient,
    RequestConfig,
    Result,
    TransportConfig,
    TransportPtr,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOrderStatus {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChecked {
    pub order_id: String,
}

pub fn check_order_status() -> MessageType {
    MessageType::new("CheckOrderStatus")
}

pub fn order_status() -> MessageType {
    MessageType::new("OrderStatus")
}

/// One service queue and one reply queue on a private hub.
pub struct Bus {
    // ---
    pub hub: std::sync::Arc<MemoryHub>,
    pub transport: TransportPtr,
    pub service: ReceiveEndpoint,
    pub replies: ReceiveEndpoint,
}

impl Bus {
    // ---
    pub async fn new() -> Result<Self> {
        // ---
        let hub = MemoryHub::new();
        let config = TransportConfig {
            uri: "rabbitmq://localhost/".into(),
            node_id: "test-bus".into(),
            transport_type: Some("memory".into()),
        };
        let transport = create_memory_transport_with_hub(config, hub.clone()).await?;

        let service_address = EndpointAddress::for_exchange(
            transport.host_address(),
            "order-status",
            ExchangeOverrides::default(),
        );
        let service = ReceiveEndpoint::new(transport.clone(), service_address).await?;
        let replies = ReceiveEndpoint::temporary(transport.clone()).await?;

        Ok(Self {
            hub,
            transport,
            service,
            replies,
        })
    }

    pub fn client(&self, config: RequestConfig) -> RequestClient<CheckOrderStatus, OrderStatus> {
        // ---
        RequestClient::new(
            &self.replies,
            self.replies.send_endpoint(self.service.address().clone()),
            check_order_status(),
            order_status(),
            config,
        )
    }

    /// Answer every status check with `status`.
    pub fn serve_status(&self, status: &'static str) {
        // ---
        self.service.handle(
            &check_order_status(),
            move |ctx: ConsumeContext<CheckOrderStatus>| async move {
                let reply = OrderStatus {
                    order_id: ctx.message().order_id.clone(),
                    status: status.to_string(),
                };
                ctx.respond(reply).await
            },
        );
    }
}

pub fn check(order_id: &str) -> CheckOrderStatus {
    CheckOrderStatus {
        order_id: order_id.to_string(),
    }
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
