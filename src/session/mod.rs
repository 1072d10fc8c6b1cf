//! Session lifecycle: connection status, the connection manager and the
//! advisory watchdog

pub mod manager;
pub mod status;
pub mod watchdog;

pub use manager::ConnectionManager;
pub use status::{log_status_transition, ConnectionStatus, StatusBoard};
pub use watchdog::ConnectionWatchdog;
