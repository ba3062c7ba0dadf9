use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier that links a request to its eventual response or fault.
///
/// Generated by the requester, carried in the envelope's `requestId` field
/// and echoed back unchanged by the responder. Opaque to the transport.
///
/// # Format
///
/// Standard UUID format: `550e8400-e29b-41d4-a9b6-446655440000`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    // ---

    /// Generate a new globally unique request id
    pub fn generate() -> Self {
        // ---
        Self::from(Uuid::new_v4())
    }

    /// Borrow the request id as a string slice
    pub fn as_str(&self) -> &str {
        // ---
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string().into())
    }
}

/// Fresh message identifier for an outbound envelope.
pub(crate) fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
