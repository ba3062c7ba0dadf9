//! Order status request/response using the in-memory transport.
//!
//! Runs a responder and a requester in a single process: the requester asks
//! for an order's status, the responder answers or faults, and a third
//! request times out because nobody handles its type.
//!
//! Run with: cargo run --example order_memory

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use std::time::Duration;

use masstransit_rpc::{
    ConsumeContext, EndpointAddress, ExceptionInfo, ExchangeOverrides, MessageType,
    ReceiveEndpoint, RequestClient, RequestConfig, Result, RpcError, TransportBuilder,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Debug, Serialize, Deserialize)]
struct CheckOrderStatus {
    order_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderStatus {
    order_id: String,
    status: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CancelOrder {
    order_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderCancelled {
    order_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let transport = TransportBuilder::new()
        .uri("rabbitmq://localhost/")
        .node_id("order-demo")
        .transport_type("memory")
        .build()
        .await?;

    // --- responder side
    let orders_address = EndpointAddress::for_exchange(
        transport.host_address(),
        "order-service",
        ExchangeOverrides::default(),
    );
    let orders = ReceiveEndpoint::new(transport.clone(), orders_address).await?;

    orders.handle(
        &MessageType::new("CheckOrderStatus"),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            // ---
            let order_id = ctx.message().order_id.clone();
            if order_id.starts_with("missing") {
                return ctx
                    .respond_fault(ExceptionInfo::new(
                        "OrderNotFound",
                        format!("order {order_id} does not exist"),
                    ))
                    .await;
            }
            ctx.respond(OrderStatus {
                order_id,
                status: "shipped".to_string(),
            })
            .await
        },
    );

    // --- requester side
    let replies = ReceiveEndpoint::temporary(transport.clone()).await?;
    let config = RequestConfig::default().with_request_timeout(Duration::from_secs(2));

    let status_client = RequestClient::<CheckOrderStatus, OrderStatus>::new(
        &replies,
        replies.send_endpoint(orders.address().clone()),
        MessageType::new("CheckOrderStatus"),
        MessageType::new("OrderStatus"),
        config.clone(),
    );

    let ctx = status_client
        .get_response(CheckOrderStatus {
            order_id: "1001".to_string(),
        })
        .await?;
    println!("order {} is {}", ctx.message().order_id, ctx.message().status);

    match status_client
        .get_response(CheckOrderStatus {
            order_id: "missing-7".to_string(),
        })
        .await
    {
        Err(RpcError::Fault(fault)) => println!("fault: {fault}"),
        other => println!("unexpected outcome: {:?}", other.map(|c| c.into_message())),
    }

    // Nobody handles CancelOrder, so this one times out.
    let cancel_client = RequestClient::<CancelOrder, OrderCancelled>::new(
        &replies,
        replies.send_endpoint(orders.address().clone()),
        MessageType::new("CancelOrder"),
        MessageType::new("OrderCancelled"),
        config.with_request_timeout(Duration::from_millis(250)),
    );

    if let Err(err) = cancel_client
        .get_response(CancelOrder {
            order_id: "1001".to_string(),
        })
        .await
    {
        println!("cancel failed: {err}");
    }

    orders.stop();
    replies.stop();
    transport.close().await?;
    Ok(())
}
