//! Send and receive endpoints.
//!
//! The capabilities the correlation layer consumes from the transport: a
//! [`SendEndpoint`] targets one destination exchange, a [`ReceiveEndpoint`]
//! consumes one queue and dispatches by message type.

mod receive;
mod send;

pub use receive::ReceiveEndpoint;
pub use send::SendEndpoint;
