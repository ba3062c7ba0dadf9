//! Broker address resolution.
//!
//! A [`HostAddress`] names a broker connection scope: scheme, host, port and
//! virtual host. An [`EndpointAddress`] names an exchange (and optionally
//! the queue bound to it) inside that scope.
//!
//! Reply and fault addresses travel inside envelopes as free-form strings.
//! [`EndpointAddress::parse`] turns such a string back into a structured
//! destination relative to the receiving endpoint's host. Accepted forms:
//!
//! - `rabbitmq://host[:port]/[vhost/]name[?query]` (also `amqp://`,
//!   `rabbitmqs://`, `amqps://`)
//! - `queue:name[?query]`
//! - `exchange:name[?query]`
//! - `name` on its own
//!
//! Recognised query parameters: `durable`, `autodelete`, `temporary`,
//! `type`, `bind`, `queue`. Unknown parameters are ignored.
//!
//! Both types compare, hash and print by their canonical string.

use std::fmt;
use std::hash::{Hash, Hasher};

use url::{form_urlencoded, Url};

use crate::{Result, RpcError};

const DEFAULT_VHOST: &str = "/";
const DEFAULT_EXCHANGE_TYPE: &str = "fanout";
const AMQP_PORT: u16 = 5672;
const AMQPS_PORT: u16 = 5671;

fn parse_error(raw: &str, reason: impl fmt::Display) -> RpcError {
    RpcError::AddressParse(format!("{raw}: {reason}"))
}

/// Returns `Some(secure)` for supported broker schemes.
fn scheme_security(scheme: &str) -> Option<bool> {
    match scheme {
        "rabbitmq" | "amqp" => Some(false),
        "rabbitmqs" | "amqps" => Some(true),
        _ => None,
    }
}

fn decode_vhost(segment: &str) -> String {
    if segment.eq_ignore_ascii_case("%2f") {
        DEFAULT_VHOST.to_string()
    } else {
        segment.to_string()
    }
}

/// Broker connection scope.
#[derive(Debug, Clone)]
pub struct HostAddress {
    secure: bool,
    host: String,
    port: Option<u16>,
    virtual_host: String,
}

impl HostAddress {
    // ---

    /// Host address on the default virtual host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            host: host.into().to_ascii_lowercase(),
            port: None,
            virtual_host: DEFAULT_VHOST.to_string(),
        }
    }

    /// Parse a host location such as `rabbitmq://localhost/` or
    /// `amqp://broker:5672/sales`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AddressParse`] for an unsupported scheme, a
    /// missing host, or a path naming more than a virtual host.
    pub fn parse(uri: &str) -> Result<Self> {
        // ---
        let url = Url::parse(uri).map_err(|e| parse_error(uri, e))?;

        let secure = scheme_security(url.scheme())
            .ok_or_else(|| parse_error(uri, format!("unsupported scheme `{}`", url.scheme())))?;

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
            _ => return Err(parse_error(uri, "missing host")),
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let virtual_host = match segments.as_slice() {
            [] => DEFAULT_VHOST.to_string(),
            [vhost] => decode_vhost(vhost),
            _ => return Err(parse_error(uri, "host address must not name an entity")),
        };

        Ok(Self {
            secure,
            host,
            port: url.port(),
            virtual_host,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = vhost.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Port, falling back to the scheme default.
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.secure { AMQPS_PORT } else { AMQP_PORT })
    }

    /// Connection URI understood by AMQP client libraries.
    pub fn amqp_uri(&self) -> String {
        // ---
        let scheme = if self.secure { "amqps" } else { "amqp" };
        let vhost = if self.virtual_host == DEFAULT_VHOST {
            "%2f"
        } else {
            self.virtual_host.as_str()
        };
        format!("{scheme}://{}:{}/{vhost}", self.host, self.port())
    }

    /// Whether `other` refers to the same connection scope.
    pub fn same_scope(&self, other: &HostAddress) -> bool {
        self.secure == other.secure
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port() == other.port()
            && self.virtual_host == other.virtual_host
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let scheme = if self.secure { "rabbitmqs" } else { "rabbitmq" };
        let default_port = if self.secure { AMQPS_PORT } else { AMQP_PORT };

        write!(f, "{scheme}://{}", self.host)?;
        match self.port {
            Some(port) if port != default_port => write!(f, ":{port}/")?,
            _ => f.write_str("/")?,
        }
        if self.virtual_host != DEFAULT_VHOST {
            write!(f, "{}/", self.virtual_host)?;
        }
        Ok(())
    }
}

impl PartialEq for HostAddress {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for HostAddress {}

impl Hash for HostAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

/// Optional settings applied when building a destination from an exchange
/// name with [`EndpointAddress::for_exchange`].
#[derive(Debug, Clone, Default)]
pub struct ExchangeOverrides {
    pub durable: Option<bool>,
    pub auto_delete: Option<bool>,
    pub exchange_type: Option<String>,
    pub bind_to_queue: Option<bool>,
    pub queue_name: Option<String>,
}

impl ExchangeOverrides {
    /// Non-durable, auto-deleted entity (used for per-client reply queues).
    pub fn temporary() -> Self {
        Self {
            durable: Some(false),
            auto_delete: Some(true),
            ..Self::default()
        }
    }
}

/// A structured send/receive destination inside a broker scope.
#[derive(Debug, Clone)]
pub struct EndpointAddress {
    host: HostAddress,
    name: String,
    durable: bool,
    auto_delete: bool,
    exchange_type: String,
    bind_to_queue: bool,
    queue_name: Option<String>,
}

impl EndpointAddress {
    // ---

    fn named(host: HostAddress, name: String) -> Self {
        Self {
            host,
            name,
            durable: true,
            auto_delete: false,
            exchange_type: DEFAULT_EXCHANGE_TYPE.to_string(),
            bind_to_queue: false,
            queue_name: None,
        }
    }

    /// Build a destination directly from a known exchange name.
    ///
    /// No string parsing takes place; the name is used as given.
    pub fn for_exchange(
        host: &HostAddress,
        exchange: impl Into<String>,
        overrides: ExchangeOverrides,
    ) -> Self {
        // ---
        let mut address = Self::named(host.clone(), exchange.into());
        if let Some(durable) = overrides.durable {
            address.durable = durable;
        }
        if let Some(auto_delete) = overrides.auto_delete {
            address.auto_delete = auto_delete;
        }
        if let Some(exchange_type) = overrides.exchange_type {
            address.exchange_type = exchange_type;
        }
        if let Some(bind) = overrides.bind_to_queue {
            address.bind_to_queue = bind;
        }
        address.queue_name = overrides.queue_name;
        address
    }

    /// Resolve a free-form address string relative to `host`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AddressParse`] if `raw` is malformed, names no
    /// entity, uses an unknown scheme, or points at a different host or
    /// virtual host than `host`.
    pub fn parse(host: &HostAddress, raw: &str) -> Result<Self> {
        // ---
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(parse_error(raw, "empty address"));
        }

        if trimmed.contains("://") {
            return Self::parse_uri(host, trimmed);
        }

        let (body, query) = match trimmed.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (trimmed, None),
        };

        let mut address = if let Some(name) = body.strip_prefix("queue:") {
            let mut address = Self::named(host.clone(), validate_name(raw, name)?);
            address.bind_to_queue = true;
            address.queue_name = Some(address.name.clone());
            address
        } else if let Some(name) = body.strip_prefix("exchange:") {
            Self::named(host.clone(), validate_name(raw, name)?)
        } else if body.contains(':') {
            return Err(parse_error(raw, "unrecognized address scheme"));
        } else {
            Self::named(host.clone(), validate_name(raw, body)?)
        };

        if let Some(query) = query {
            address.apply_query(raw, form_urlencoded::parse(query.as_bytes()))?;
        }

        Ok(address)
    }

    fn parse_uri(host: &HostAddress, raw: &str) -> Result<Self> {
        // ---
        let url = Url::parse(raw).map_err(|e| parse_error(raw, e))?;

        let secure = scheme_security(url.scheme())
            .ok_or_else(|| parse_error(raw, format!("unsupported scheme `{}`", url.scheme())))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (virtual_host, name) = match segments.as_slice() {
            [name] => (DEFAULT_VHOST.to_string(), *name),
            [vhost, name] => (decode_vhost(vhost), *name),
            [] => return Err(parse_error(raw, "missing entity name")),
            _ => return Err(parse_error(raw, "too many path segments")),
        };

        let target = HostAddress {
            secure,
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port(),
            virtual_host,
        };

        if !target.same_scope(host) {
            return Err(parse_error(
                raw,
                format!("scope {target} is not reachable from {host}"),
            ));
        }

        let mut address = Self::named(host.clone(), validate_name(raw, name)?);
        address.apply_query(raw, url.query_pairs())?;
        Ok(address)
    }

    fn apply_query<'a, I>(&mut self, raw: &str, pairs: I) -> Result<()>
    where
        I: Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
    {
        // ---
        for (key, value) in pairs {
            match key.to_ascii_lowercase().as_str() {
                "durable" => self.durable = parse_flag(raw, &key, &value)?,
                "autodelete" => self.auto_delete = parse_flag(raw, &key, &value)?,
                "temporary" => {
                    if parse_flag(raw, &key, &value)? {
                        self.durable = false;
                        self.auto_delete = true;
                    }
                }
                "type" => self.exchange_type = value.into_owned(),
                "bind" => self.bind_to_queue = parse_flag(raw, &key, &value)?,
                "queue" => self.queue_name = Some(validate_name(raw, &value)?),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn host(&self) -> &HostAddress {
        &self.host
    }

    /// Exchange (and default queue) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn exchange_type(&self) -> &str {
        &self.exchange_type
    }

    pub fn bind_to_queue(&self) -> bool {
        self.bind_to_queue
    }

    /// Queue bound to the exchange, if one was named.
    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }
}

fn validate_name(raw: &str, name: &str) -> Result<String> {
    // ---
    if name.is_empty() {
        return Err(parse_error(raw, "missing entity name"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(parse_error(raw, format!("invalid character `{bad}` in name")));
    }
    Ok(name.to_string())
}

fn parse_flag(raw: &str, key: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .map_err(|_| parse_error(raw, format!("`{key}` expects true or false, got `{value}`")))
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}{}", self.host, self.name)?;

        let mut query = form_urlencoded::Serializer::new(String::new());
        if !self.durable && self.auto_delete {
            query.append_pair("temporary", "true");
        } else {
            if !self.durable {
                query.append_pair("durable", "false");
            }
            if self.auto_delete {
                query.append_pair("autodelete", "true");
            }
        }
        if self.exchange_type != DEFAULT_EXCHANGE_TYPE {
            query.append_pair("type", &self.exchange_type);
        }
        if self.bind_to_queue {
            query.append_pair("bind", "true");
        }
        if let Some(queue) = &self.queue_name {
            query.append_pair("queue", queue);
        }

        let query = query.finish();
        if !query.is_empty() {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

impl PartialEq for EndpointAddress {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for EndpointAddress {}

impl Hash for EndpointAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn localhost() -> HostAddress {
        HostAddress::parse("rabbitmq://localhost/").unwrap()
    }

    #[test]
    fn test_host_canonical_forms() {
        // ---
        assert_eq!(localhost().to_string(), "rabbitmq://localhost/");

        let host = HostAddress::parse("amqp://Broker:5673/sales").unwrap();
        assert_eq!(host.to_string(), "rabbitmq://broker:5673/sales/");
        assert_eq!(host.amqp_uri(), "amqp://broker:5673/sales");

        let host = HostAddress::parse("amqp://localhost:5672/%2f").unwrap();
        assert_eq!(host, localhost());
        assert_eq!(host.amqp_uri(), "amqp://localhost:5672/%2f");
    }

    #[test]
    fn test_host_rejects_unknown_scheme() {
        // ---
        let err = HostAddress::parse("http://localhost/").unwrap_err();
        assert!(matches!(err, RpcError::AddressParse(_)));
    }

    #[test]
    fn test_parse_absolute_reply_address() {
        // ---
        let address = EndpointAddress::parse(
            &localhost(),
            "rabbitmq://localhost/bus-abc?temporary=true",
        )
        .unwrap();

        assert_eq!(address.name(), "bus-abc");
        assert!(!address.durable());
        assert!(address.auto_delete());
        assert_eq!(address.to_string(), "rabbitmq://localhost/bus-abc?temporary=true");
    }

    #[test]
    fn test_parse_with_virtual_host() {
        // ---
        let host = HostAddress::parse("rabbitmq://localhost/sales").unwrap();
        let address = EndpointAddress::parse(&host, "rabbitmq://localhost/sales/orders").unwrap();
        assert_eq!(address.name(), "orders");
        assert_eq!(address.to_string(), "rabbitmq://localhost/sales/orders");
    }

    #[test]
    fn test_parse_short_forms() {
        // ---
        let host = localhost();

        let queue = EndpointAddress::parse(&host, "queue:orders").unwrap();
        assert_eq!(queue.name(), "orders");
        assert!(queue.bind_to_queue());
        assert_eq!(queue.queue_name(), Some("orders"));

        let exchange = EndpointAddress::parse(&host, "exchange:events?type=topic").unwrap();
        assert_eq!(exchange.name(), "events");
        assert_eq!(exchange.exchange_type(), "topic");
        assert!(!exchange.bind_to_queue());

        let bare = EndpointAddress::parse(&host, "orders").unwrap();
        assert_eq!(bare.to_string(), "rabbitmq://localhost/orders");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // ---
        let host = localhost();
        for raw in [
            "",
            "   ",
            "rabbitmq://localhost/",
            "rabbitmq://localhost/a/b/c",
            "ftp://localhost/orders",
            "topic:orders",
            "orders with spaces",
            "orders?durable=maybe",
        ] {
            let err = EndpointAddress::parse(&host, raw).unwrap_err();
            assert!(matches!(err, RpcError::AddressParse(_)), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_parse_rejects_foreign_scope() {
        // ---
        let host = localhost();
        assert!(EndpointAddress::parse(&host, "rabbitmq://elsewhere/orders").is_err());
        assert!(EndpointAddress::parse(&host, "rabbitmq://localhost/other-vhost/orders").is_err());
        assert!(EndpointAddress::parse(&host, "rabbitmqs://localhost/orders").is_err());
        assert!(EndpointAddress::parse(&host, "rabbitmq://LOCALHOST:5672/orders").is_ok());
    }

    #[test]
    fn test_for_exchange_bypasses_parsing() {
        // ---
        let host = localhost();
        let address = EndpointAddress::for_exchange(&host, "order-events", ExchangeOverrides::default());
        assert_eq!(address.to_string(), "rabbitmq://localhost/order-events");
        assert_eq!(address, EndpointAddress::parse(&host, "order-events").unwrap());

        let reply = EndpointAddress::for_exchange(&host, "bus-1", ExchangeOverrides::temporary());
        assert_eq!(reply.to_string(), "rabbitmq://localhost/bus-1?temporary=true");
    }

    #[test]
    fn test_round_trip_through_canonical_string() {
        // ---
        let host = localhost();
        let original = EndpointAddress::for_exchange(
            &host,
            "orders",
            ExchangeOverrides {
                durable: Some(false),
                exchange_type: Some("direct".into()),
                bind_to_queue: Some(true),
                queue_name: Some("orders-q".into()),
                ..ExchangeOverrides::default()
            },
        );
        let parsed = EndpointAddress::parse(&host, &original.to_string()).unwrap();
        assert_eq!(parsed, original);
        assert!(!parsed.durable());
        assert_eq!(parsed.queue_name(), Some("orders-q"));
    }
}
