//! Topic catalog and payload types for the gate controller protocol
//!
//! The catalog is the single source of truth shared by the message router
//! (inbound) and the topic façade (outbound).

pub mod actions;
pub mod messages;
pub mod topics;

pub use actions::GateAction;
pub use messages::*;
pub use topics::*;
