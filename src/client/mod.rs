//! Request client: send a request, await the correlated response.
mod pending;

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use pending::{arm_timeout, PendingGuard, PendingRequests, SharedPending};

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    ConsumeContext,
    Fault,
    MessageEnvelope,
    MessageType,
    MessageTypeName,
    ReceiveEndpoint,
    RequestConfig,
    RequestId,
    Result,
    RpcError,
    SendEndpoint,
};

/// Sends requests of type `TReq` and resolves them with the correlated
/// `TResp` response, a fault, or a timeout.
///
/// Each call generates a fresh request id and stamps it, together with the
/// receive endpoint's address as `responseAddress`, on the outgoing
/// envelope. Two standing handlers on the receive endpoint (one for the
/// response type, one for the fault of the request type) settle the
/// matching pending call. Deliveries whose request id is unknown are
/// dropped.
///
/// Cheap to clone; clones share the same pending requests.
///
/// # Example
///
/// ```no_run
/// use masstransit_rpc::{
///     EndpointAddress, ExchangeOverrides, MessageType, ReceiveEndpoint, RequestClient,
///     RequestConfig, TransportPtr,
/// };
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct CheckOrderStatus { order_id: String }
///
/// #[derive(Deserialize)]
/// struct OrderStatus { status: String }
///
/// # async fn example(transport: TransportPtr) -> masstransit_rpc::Result<()> {
/// let replies = ReceiveEndpoint::temporary(transport.clone()).await?;
/// let orders = EndpointAddress::for_exchange(
///     transport.host_address(),
///     "order-status",
///     ExchangeOverrides::default(),
/// );
///
/// let client = RequestClient::<CheckOrderStatus, OrderStatus>::new(
///     &replies,
///     replies.send_endpoint(orders),
///     MessageType::new("CheckOrderStatus"),
///     MessageType::new("OrderStatus"),
///     RequestConfig::default().with_request_timeout(Duration::from_secs(5)),
/// );
///
/// let ctx = client
///     .get_response(CheckOrderStatus { order_id: "42".into() })
///     .await?;
/// println!("status: {}", ctx.message().status);
/// # Ok(())
/// # }
/// ```
pub struct RequestClient<TReq, TResp> {
    inner: Arc<Inner<TResp>>,
    _phantom: PhantomData<fn(TReq)>,
}

struct Inner<TResp> {
    receive_endpoint: ReceiveEndpoint,
    send_endpoint: SendEndpoint,
    request_type: MessageType,
    response_type: MessageType,
    config: RequestConfig,
    pending: SharedPending<ConsumeContext<TResp>>,
}

impl<TReq, TResp> Clone for RequestClient<TReq, TResp> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

impl<TReq, TResp> RequestClient<TReq, TResp>
where
    TReq: Serialize,
    TResp: DeserializeOwned + Send + 'static,
{
    // ---

    /// Create a client that sends through `send_endpoint` and receives
    /// replies on `receive_endpoint`.
    ///
    /// Installs the response handler for `response_type` and the fault
    /// handler for the fault of `request_type` on `receive_endpoint`,
    /// replacing any handlers previously registered for those types.
    pub fn new(
        receive_endpoint: &ReceiveEndpoint,
        send_endpoint: SendEndpoint,
        request_type: MessageType,
        response_type: MessageType,
        config: RequestConfig,
    ) -> Self {
        // ---
        let pending: SharedPending<ConsumeContext<TResp>> =
            Arc::new(Mutex::new(PendingRequests::new()));

        // Payloads are bound here rather than by the endpoint so that a
        // matching reply which fails to decode still settles its request.
        let responses = Arc::clone(&pending);
        receive_endpoint.handle::<Value, _, _>(&response_type, move |ctx| {
            let pending = Arc::clone(&responses);
            async move {
                let request_id = ctx.request_id.clone();
                settle_delivery(&pending, request_id.as_deref(), ctx.into_typed::<TResp>());
                Ok(())
            }
        });

        let faults = Arc::clone(&pending);
        receive_endpoint.handle_fault(&request_type.fault(), move |ctx| {
            let pending = Arc::clone(&faults);
            async move {
                let request_id = ctx.request_id.clone();
                let fault: Fault = ctx.into_message();
                settle_delivery(&pending, request_id.as_deref(), Err(RpcError::Fault(Box::new(fault))));
                Ok(())
            }
        });

        log_debug!(
            "request client {} -> {} on {}",
            request_type,
            response_type,
            receive_endpoint.address()
        );

        Self {
            inner: Arc::new(Inner {
                receive_endpoint: receive_endpoint.clone(),
                send_endpoint,
                request_type,
                response_type,
                config,
                pending,
            }),
            _phantom: PhantomData,
        }
    }

    /// Send `request` and await its response.
    ///
    /// See [`get_response_with`](Self::get_response_with).
    pub async fn get_response(&self, request: TReq) -> Result<ConsumeContext<TResp>> {
        self.request(request, self.inner.config.request_timeout, |_| {})
            .await
    }

    /// Send `request` and await its response, adjusting the outgoing
    /// envelope with `mutate` first.
    ///
    /// `requestId`, `responseAddress` and `messageType` are assigned after
    /// `mutate` runs and cannot be overridden by it.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if a timeout is configured and nothing
    ///   matching arrived in time.
    /// - [`RpcError::Fault`] if the responder replied with a fault.
    /// - [`RpcError::Serialization`] if the matching response does not
    ///   decode as `TResp`.
    /// - The send error, if the request could not be sent. The pending
    ///   entry is removed in that case.
    pub async fn get_response_with<F>(
        &self,
        request: TReq,
        mutate: F,
    ) -> Result<ConsumeContext<TResp>>
    where
        F: FnOnce(&mut MessageEnvelope<TReq>),
    {
        self.request(request, self.inner.config.request_timeout, mutate)
            .await
    }

    /// Send `request` with a timeout for this call only.
    pub async fn get_response_timeout(
        &self,
        request: TReq,
        timeout: Duration,
    ) -> Result<ConsumeContext<TResp>> {
        self.request(request, Some(timeout), |_| {}).await
    }

    /// Number of requests still waiting for settlement.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    pub fn request_type(&self) -> &MessageType {
        &self.inner.request_type
    }

    pub fn response_type(&self) -> &MessageType {
        &self.inner.response_type
    }

    async fn request<F>(
        &self,
        request: TReq,
        timeout: Option<Duration>,
        mutate: F,
    ) -> Result<ConsumeContext<TResp>>
    where
        F: FnOnce(&mut MessageEnvelope<TReq>),
    {
        // ---
        let inner = &self.inner;
        let request_id = RequestId::generate();

        let rx = lock_ignore_poison(&inner.pending).register(request_id.clone());

        // Removes the entry if the send fails or the caller stops waiting.
        let _guard = PendingGuard::new(Arc::clone(&inner.pending), request_id.clone());

        if let Some(timeout) = timeout {
            arm_timeout(&inner.pending, request_id.clone(), timeout);
        }

        let id = request_id.as_str().to_string();
        let response_address = inner.receive_endpoint.address().to_string();
        let message_type = inner.request_type.to_message_type();

        log_debug!("request {request_id} sent as {}", inner.request_type);

        inner
            .send_endpoint
            .send_with(request, &inner.config.send_options, move |env| {
                mutate(env);
                env.request_id = Some(id);
                env.response_address = Some(response_address);
                env.message_type = message_type;
            })
            .await?;

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Transport(format!(
                "request {request_id} dropped before settlement"
            ))),
        }
    }
}

/// Settle the pending request named by an inbound delivery, if any.
fn settle_delivery<V>(pending: &SharedPending<V>, request_id: Option<&str>, outcome: Result<V>) {
    // ---
    let Some(request_id) = request_id else {
        log_debug!("delivery without requestId dropped");
        return;
    };

    let settled = lock_ignore_poison(pending).settle(&RequestId::from(request_id), outcome);
    if !settled {
        log_debug!("no pending request {request_id}, delivery dropped");
    }
}
