//! Test doubles
//!
//! Lets the connection manager and the gate client run without a broker.

pub mod mocks;

pub use mocks::*;
