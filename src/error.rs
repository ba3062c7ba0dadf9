use std::time::Duration;

use thiserror::Error;

use crate::envelope::Fault;

/// Errors surfaced by the correlation layer and its collaborators.
#[derive(Error, Debug)]
pub enum RpcError {
    /// A reply/fault address or host location could not be resolved.
    #[error("address parse error: {0}")]
    AddressParse(String),

    /// No matching response or fault arrived within the configured duration.
    #[error("request timeout in {0:?}")]
    Timeout(Duration),

    /// The responder explicitly signalled failure.
    ///
    /// Carries the fault payload sent back by the responder.
    #[error("request faulted: {0}")]
    Fault(Box<Fault>),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure (publish, subscribe, connection).
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound message could not be interpreted as an envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Required configuration was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration settings contradict each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),
}

impl RpcError {
    /// The fault payload, if this error is a responder fault.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            RpcError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result type alias for correlation-layer operations.
pub type Result<T> = std::result::Result<T, RpcError>;
