//! Message routing: inbound notifications and outbound commands

pub mod facade;
pub mod router;

pub use facade::{BatchOutcome, SubscribeOptions, TopicFacade};
pub use router::{GateEvent, MessageRouter, Notification};
