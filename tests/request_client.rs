// tests/request_client.rs

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use common::{check, check_order_status, init_logging, Bus, CheckOrderStatus, OrderStatus};
use masstransit_rpc::{
    // ---
    ConsumeContext,
    EndpointAddress,
    ExceptionInfo,
    ExchangeOverrides,
    Fault,
    HostAddress,
    MessageTypeName,
    RequestConfig,
    Result,
    RpcError,
    SendOptions,
};

#[tokio::test]
async fn test_basic_request() -> Result<()> {
    // ---
    init_logging();

    let bus = Bus::new().await?;
    bus.serve_status("shipped");

    let client = bus.client(RequestConfig::default());
    let ctx = client.get_response(check("1001")).await?;

    assert_eq!(
        ctx.message(),
        &OrderStatus {
            order_id: "1001".into(),
            status: "shipped".into(),
        }
    );
    assert!(ctx.request_id.is_some());
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_each_get_their_own_response() -> Result<()> {
    // ---
    init_logging();

    let bus = Bus::new().await?;
    bus.serve_status("packed");
    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));

    let mut handles = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let order_id = format!("order-{i}");
            let ctx = client.get_response(check(&order_id)).await?;
            Ok::<_, RpcError>((order_id, ctx.into_message()))
        }));
    }

    for handle in handles {
        let (order_id, response) = handle.await.expect("request task panicked")?;
        assert_eq!(response.order_id, order_id);
        assert_eq!(response.status, "packed");
    }

    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_duration() -> Result<()> {
    // ---
    init_logging();

    // Nobody handles the request.
    let bus = Bus::new().await?;
    let client =
        bus.client(RequestConfig::default().with_request_timeout(Duration::from_millis(100)));

    let err = client.get_response(check("lost")).await.err().unwrap();

    assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(100)));
    assert!(err.to_string().contains("100ms"), "got: {err}");
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_per_call_timeout_overrides_config() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(60)));

    let err = client
        .get_response_timeout(check("lost"), Duration::from_millis(30))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(30)));
    Ok(())
}

#[tokio::test]
async fn test_fault_rejects_request() -> Result<()> {
    // ---
    init_logging();

    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            ctx.respond_fault(ExceptionInfo::new("OrderNotFound", "order 404 does not exist"))
                .await
        },
    );

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let err = client.get_response(check("404")).await.err().unwrap();

    let fault = err.fault().expect("expected a fault");
    assert_eq!(fault.reason(), Some("order 404 does not exist"));
    assert_eq!(fault.exceptions[0].exception_type, "OrderNotFound");

    let original: CheckOrderStatus = serde_json::from_value(fault.message.clone())?;
    assert_eq!(original, check("404"));
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_late_timeout_after_response() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    bus.serve_status("delivered");

    let client =
        bus.client(RequestConfig::default().with_request_timeout(Duration::from_millis(200)));
    let ctx = client.get_response(check("7")).await?;
    assert_eq!(ctx.message().status, "delivered");

    // Well past the deadline: the disarmed timer must not resurrect anything.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.pending_count(), 0);

    // The client is still usable afterwards.
    let again = client.get_response(check("8")).await?;
    assert_eq!(again.message().order_id, "8");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_replies_settle_once() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            for status in ["first", "second"] {
                let reply = OrderStatus {
                    order_id: ctx.message().order_id.clone(),
                    status: status.to_string(),
                };
                ctx.respond(reply).await?;
            }
            Ok(())
        },
    );

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let ctx = client.get_response(check("dup")).await?;
    assert_eq!(ctx.message().status, "first");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_request_id_is_ignored() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            let stray = OrderStatus {
                order_id: "someone-else".into(),
                status: "stray".into(),
            };
            ctx.respond_with(stray, |env| {
                env.request_id = Some("00000000-0000-0000-0000-000000000000".into());
            })
            .await?;

            let reply = OrderStatus {
                order_id: ctx.message().order_id.clone(),
                status: "mine".into(),
            };
            ctx.respond(reply).await
        },
    );

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let ctx = client.get_response(check("42")).await?;

    assert_eq!(ctx.message().status, "mine");
    assert_eq!(ctx.message().order_id, "42");
    Ok(())
}

#[tokio::test]
async fn test_independent_settlement() -> Result<()> {
    // ---
    init_logging();

    let bus = Bus::new().await?;

    // Park inbound requests so the test decides when each is answered.
    let (tx, mut rx) = mpsc::channel::<ConsumeContext<CheckOrderStatus>>(4);
    bus.service
        .handle(&check_order_status(), move |ctx: ConsumeContext<CheckOrderStatus>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ctx).await;
                Ok(())
            }
        });

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));

    let call_a = tokio::spawn({
        let client = client.clone();
        async move { client.get_response(check("A")).await }
    });
    let call_b = tokio::spawn({
        let client = client.clone();
        async move { client.get_response(check("B")).await }
    });

    let first = rx.recv().await.expect("first request");
    let second = rx.recv().await.expect("second request");
    let (ctx_a, ctx_b) = if first.message().order_id == "A" {
        (first, second)
    } else {
        (second, first)
    };
    assert_ne!(ctx_a.request_id, ctx_b.request_id);

    ctx_b
        .respond(OrderStatus {
            order_id: "B".into(),
            status: "done".into(),
        })
        .await?;

    let b = call_b.await.expect("call B panicked")?;
    assert_eq!(b.message().order_id, "B");
    assert_eq!(client.pending_count(), 1);
    assert!(!call_a.is_finished());

    ctx_a
        .respond(OrderStatus {
            order_id: "A".into(),
            status: "done".into(),
        })
        .await?;

    let a = call_a.await.expect("call A panicked")?;
    assert_eq!(a.message().order_id, "A");
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_envelope_mutation_keeps_correlation_fields() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            let tenant = ctx
                .header("tenant")
                .and_then(|v| v.as_str())
                .unwrap_or("none")
                .to_string();
            let reply = OrderStatus {
                order_id: ctx.request_id.clone().unwrap_or_default(),
                status: tenant,
            };
            ctx.respond(reply).await
        },
    );

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let ctx = client
        .get_response_with(check("9"), |env| {
            env.set_header("tenant", "acme");
            env.request_id = Some("spoofed".into());
        })
        .await?;

    assert_eq!(ctx.message().status, "acme");
    assert_ne!(ctx.message().order_id, "spoofed");
    assert_eq!(ctx.request_id.as_deref(), Some(ctx.message().order_id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_abandoned_request_is_removed() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    let client = bus.client(RequestConfig::default());

    let outcome =
        tokio::time::timeout(Duration::from_millis(50), client.get_response(check("gone"))).await;

    assert!(outcome.is_err(), "nobody should have answered");
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_send_failure_removes_entry() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    let elsewhere = EndpointAddress::for_exchange(
        &HostAddress::new("elsewhere"),
        "order-status",
        ExchangeOverrides::default(),
    );

    let client = masstransit_rpc::RequestClient::<CheckOrderStatus, OrderStatus>::new(
        &bus.replies,
        bus.replies.send_endpoint(elsewhere),
        check_order_status(),
        common::order_status(),
        RequestConfig::default(),
    );

    let err = client.get_response(check("x")).await.err().unwrap();
    assert!(matches!(err, RpcError::Transport(_)), "got: {err:?}");
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_undecodable_response_settles_with_error() -> Result<()> {
    // ---
    init_logging();

    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            ctx.respond_with(json!({ "unexpected": 1 }), |env| {
                env.set_message_type(&common::order_status());
            })
            .await
        },
    );

    // No timeout configured: only the reply itself can end the call.
    let client = bus.client(RequestConfig::default());
    let outcome = tokio::time::timeout(Duration::from_secs(2), client.get_response(check("5")))
        .await
        .expect("a matching reply must settle the request");

    assert!(
        matches!(outcome, Err(RpcError::Serialization(_))),
        "got: {:?}",
        outcome.map(|ctx| ctx.into_message())
    );
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

/// Answer each status check with both a fault and a response, in the given
/// order, for the same request id.
fn serve_fault_and_response(bus: &Bus, fault_first: bool) {
    // ---
    bus.service.handle(
        &check_order_status(),
        move |ctx: ConsumeContext<CheckOrderStatus>| async move {
            let reply = OrderStatus {
                order_id: ctx.message().order_id.clone(),
                status: "answered".into(),
            };
            let exception = ExceptionInfo::new("Conflicted", "changed its mind");

            if fault_first {
                ctx.respond_fault(exception).await?;
                ctx.respond(reply).await
            } else {
                ctx.respond(reply).await?;
                ctx.respond_fault(exception).await
            }
        },
    );
}

#[tokio::test]
async fn test_response_after_fault_is_ignored() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    serve_fault_and_response(&bus, true);

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let err = client.get_response(check("f1")).await.err().unwrap();
    assert_eq!(err.fault().and_then(Fault::reason), Some("changed its mind"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_fault_after_response_is_ignored() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    serve_fault_and_response(&bus, false);

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let ctx = client.get_response(check("r1")).await?;
    assert_eq!(ctx.message().status, "answered");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count(), 0);

    // Later requests are unaffected by the stale fault.
    let again = client.get_response(check("r2")).await?;
    assert_eq!(again.message().order_id, "r2");
    Ok(())
}

#[tokio::test]
async fn test_fault_with_foreign_request_id_is_ignored() -> Result<()> {
    // ---
    let bus = Bus::new().await?;
    bus.service.handle(
        &check_order_status(),
        |ctx: ConsumeContext<CheckOrderStatus>| async move {
            let reply_to = EndpointAddress::parse(
                ctx.receive_endpoint().host_address(),
                ctx.response_address.as_deref().unwrap_or_default(),
            )?;

            let stray = Fault::new(
                None,
                serde_json::Value::Null,
                vec![ExceptionInfo::new("Stray", "meant for another requester")],
            );
            ctx.receive_endpoint()
                .send_endpoint(reply_to)
                .send_with(stray, &SendOptions::default(), |env| {
                    env.request_id = Some("00000000-0000-0000-0000-000000000000".into());
                    env.message_type = check_order_status().fault().to_message_type();
                })
                .await?;

            let reply = OrderStatus {
                order_id: ctx.message().order_id.clone(),
                status: "mine".into(),
            };
            ctx.respond(reply).await
        },
    );

    let client = bus.client(RequestConfig::default().with_request_timeout(Duration::from_secs(5)));
    let ctx = client.get_response(check("43")).await?;

    assert_eq!(ctx.message().status, "mine");
    assert_eq!(client.pending_count(), 0);
    Ok(())
}
