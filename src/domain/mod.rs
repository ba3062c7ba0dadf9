//! Domain layer public interface.
//!
//! Defines the collaborator abstractions the correlation layer calls into,
//! independent of any concrete broker client.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportMessage,
    TransportPtr,
};
