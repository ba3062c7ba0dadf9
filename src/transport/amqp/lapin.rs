//! AMQP transport implementation using `lapin`.
//!
//! ## Concurrency model
//!
//! A single background **actor task** owns the AMQP connection and channel
//! and serializes every broker operation: declaring topology, publishing,
//! starting consumers and shutting down. No other task touches the
//! connection directly, which keeps the public `Transport` contract
//! (`Send + Sync`) independent of the client's channel semantics.
//!
//! ## Topology
//!
//! Each endpoint is a fanout exchange with a queue of the same name bound to
//! it (or the queue named by the address). Durability and auto-delete come
//! from the [`EndpointAddress`]. Exchanges are declared lazily, on the first
//! send or subscribe that names them.
//!
//! ## Delivery
//!
//! Messages are acknowledged as soon as they are handed to local
//! subscribers. `SendOptions::persistent` maps to delivery mode 2 and
//! `SendOptions::expiration` to the per-message TTL.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        ExchangeDeclareOptions,
        QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
    ExchangeKind,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    EndpointAddress,
    HostAddress,
    Result,
    RpcError,
    SendOptions,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportMessage,
    TransportPtr,
    ENVELOPE_CONTENT_TYPE,
};

const PERSISTENT_DELIVERY: u8 = 2;
const TRANSIENT_DELIVERY: u8 = 1;

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<TransportMessage>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Send {
        msg: TransportMessage,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        endpoint: EndpointAddress,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// AMQP transport backed by a lapin connection.
struct AmqpTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor: RwLock<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Spawns the actor task that owns `connection` and `channel`.
    fn create(base: TransportBase, connection: Connection, channel: Channel) -> TransportPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

        let actor = Actor {
            transport_id: base.transport_id.clone(),
            connection,
            channel,
            cmd_rx,
            subscribers: Arc::clone(&subscribers),
            declared: HashSet::new(),
            consumers: HashMap::new(),
        };

        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            base,
            cmd_tx,
            subscribers,
            actor: RwLock::new(Some(handle)),
        })
    }

    async fn call(&self, cmd: Cmd, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        // ---
        self.cmd_tx.send(cmd).await.map_err(|e| {
            RpcError::Transport(format!("amqp: actor command channel closed: {e}"))
        })?;

        rx.await
            .map_err(|e| RpcError::Transport(format!("amqp: actor dropped reply: {e}")))?
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    transport_id: String,
    connection: Connection,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    declared: HashSet<String>,
    consumers: HashMap<String, JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        log_info!("[{}] AMQP actor started", self.transport_id);

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Cmd::Send { msg, resp } => {
                    let _ = resp.send(self.do_send(msg).await);
                }
                Cmd::Subscribe { endpoint, resp } => {
                    let _ = resp.send(self.do_subscribe(endpoint).await);
                }
                Cmd::Close { resp } => {
                    let _ = resp.send(Ok(()));
                    self.cmd_rx.close();
                }
            }
        }

        for (_, handle) in self.consumers.drain() {
            handle.abort();
        }

        let _ = self.channel.close(200, "Normal shutdown".into()).await;
        let _ = self.connection.close(200, "Normal shutdown".into()).await;

        log_info!("[{}] AMQP actor stopped", self.transport_id);
    }

    async fn declare_exchange(&mut self, endpoint: &EndpointAddress) -> Result<()> {
        // ---
        if self.declared.contains(endpoint.name()) {
            return Ok(());
        }

        let kind = match endpoint.exchange_type() {
            "fanout" => ExchangeKind::Fanout,
            "direct" => ExchangeKind::Direct,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Custom(other.to_string()),
        };

        let opts = ExchangeDeclareOptions {
            durable: endpoint.durable(),
            auto_delete: endpoint.auto_delete(),
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(endpoint.name().into(), kind, opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: exchange declare failed: {e}")))?;

        log_debug!("[{}] Declared exchange: {}", self.transport_id, endpoint.name());
        self.declared.insert(endpoint.name().to_string());
        Ok(())
    }

    async fn do_send(&mut self, msg: TransportMessage) -> Result<()> {
        // ---
        self.declare_exchange(&msg.destination).await?;

        let mut properties = BasicProperties::default()
            .with_content_type(msg.content_type.as_ref().into())
            .with_delivery_mode(if msg.options.persistent {
                PERSISTENT_DELIVERY
            } else {
                TRANSIENT_DELIVERY
            });
        if let Some(ttl) = msg.options.expiration {
            properties = properties.with_expiration(ttl.as_millis().to_string().into());
        }

        self.channel
            .basic_publish(
                msg.destination.name().into(),
                "".into(),
                BasicPublishOptions::default(),
                &msg.body,
                properties,
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish failed: {e}")))?;

        log_debug!("[{}] Sent to exchange: {}", self.transport_id, msg.destination.name());
        Ok(())
    }

    async fn do_subscribe(&mut self, endpoint: EndpointAddress) -> Result<()> {
        // ---
        self.declare_exchange(&endpoint).await?;

        let queue = endpoint.queue_name().unwrap_or(endpoint.name()).to_string();

        if self.consumers.contains_key(&queue) {
            log_debug!("[{}] Already consuming queue: {queue}", self.transport_id);
            return Ok(());
        }

        let queue_opts = QueueDeclareOptions {
            durable: endpoint.durable(),
            auto_delete: endpoint.auto_delete(),
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(queue.as_str(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        self.channel
            .queue_bind(
                queue.as_str(),
                endpoint.name().into(),
                "".into(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue bind failed: {e}")))?;

        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                &format!("{}-{queue}", self.transport_id),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] Consuming queue: {queue}", self.transport_id);

        let transport_id = self.transport_id.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let exchange = endpoint.name().to_string();

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(_e) => {
                        log_error!("[{transport_id}] Consumer error on {exchange}: {_e}");
                        break;
                    }
                };

                if let Err(_e) = delivery.ack(BasicAckOptions::default()).await {
                    log_error!("[{transport_id}] Failed to ack message: {_e}");
                    continue;
                }

                let props = &delivery.properties;
                let options = SendOptions {
                    persistent: props.delivery_mode().map_or(true, |m| m == PERSISTENT_DELIVERY),
                    expiration: props
                        .expiration()
                        .as_ref()
                        .and_then(|ttl| ttl.as_str().parse::<u64>().ok())
                        .map(std::time::Duration::from_millis),
                };
                let content_type: Arc<str> = props
                    .content_type()
                    .as_ref()
                    .map(|ct| Arc::from(ct.as_str()))
                    .unwrap_or_else(|| Arc::from(ENVELOPE_CONTENT_TYPE));

                let msg = TransportMessage {
                    destination: endpoint.clone(),
                    body: Bytes::from(delivery.data),
                    options,
                    content_type,
                };

                let senders = subscribers.read().await.get(&exchange).cloned().unwrap_or_default();
                for tx in senders {
                    if let Err(_e) = tx.send(msg.clone()).await {
                        log_debug!("[{transport_id}] Subscriber of {exchange} gone: {_e}");
                    }
                }
            }

            log_info!("[{transport_id}] Consumer task ended for {exchange}");
        });

        self.consumers.insert(queue, handle);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send(&self, msg: TransportMessage) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(Cmd::Send { msg, resp: tx }, rx).await
    }

    async fn subscribe(&self, endpoint: &EndpointAddress) -> Result<SubscriptionHandle> {
        // ---
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .write()
            .await
            .entry(endpoint.name().to_string())
            .or_default()
            .push(tx);

        let (resp_tx, resp_rx) = oneshot::channel();
        self.call(
            Cmd::Subscribe {
                endpoint: endpoint.clone(),
                resp: resp_tx,
            },
            resp_rx,
        )
        .await?;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        if let Some(handle) = self.actor.write().await.take() {
            let _ = handle.await;
        }
        self.subscribers.write().await.clear();
        Ok(())
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// `config.uri` may be an `amqp://` connection string (credentials are
/// passed through to lapin) or a `rabbitmq://` host address.
///
/// # Errors
///
/// Returns an error if the URI cannot be parsed or the broker connection
/// fails. The connection is established before this function returns.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let host = HostAddress::parse(&config.uri)?;

    let connect_uri = if config.uri.starts_with("amqp") {
        config.uri.clone()
    } else {
        host.amqp_uri()
    };

    log_info!("Connecting to AMQP broker: {host}");

    let connection = Connection::connect(&connect_uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    let channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    log_info!("Connected to AMQP broker");

    Ok(AmqpTransport::create(
        TransportBase::new(config.node_id, host),
        connection,
        channel,
    ))
}
