//! Public, transport-agnostic request configuration.
//!
//! Broker connection settings live in [`TransportConfig`](crate::TransportConfig);
//! this type only shapes how a [`RequestClient`](crate::RequestClient) sends
//! and waits.

use std::time::Duration;

use crate::SendOptions;

/// Per-client request settings.
///
/// # Example
///
/// ```
/// use masstransit_rpc::RequestConfig;
/// use std::time::Duration;
///
/// let config = RequestConfig::default()
///     .with_request_timeout(Duration::from_secs(10))
///     .with_persistent(false);
///
/// assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
/// assert!(!config.send_options.persistent);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    // ---
    /// How long a request waits for its response or fault.
    ///
    /// `None` waits indefinitely; the call then only ends on a response, a
    /// fault, or when its future is dropped.
    ///
    /// Default: `None`
    pub request_timeout: Option<Duration>,

    /// Delivery options applied to every request sent.
    pub send_options: SendOptions,
}

impl RequestConfig {
    /// Fail requests with [`RpcError::Timeout`](crate::RpcError::Timeout)
    /// after `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_send_options(mut self, options: SendOptions) -> Self {
        self.send_options = options;
        self
    }

    /// Ask the broker to persist requests (default `true`).
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.send_options.persistent = persistent;
        self
    }

    /// Let the broker discard requests not consumed within `expiration`.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.send_options.expiration = Some(expiration);
        self
    }
}
