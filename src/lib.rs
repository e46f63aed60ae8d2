#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # ChatKit Bridge
//!
//! Wires a host [`Messenger`](chatkit_messenger::Messenger) and a frame
//! messenger together in one process and exposes the protocol's operations
//! from the command line.
//!
//! This library re-exports the workspace crates for convenience.

pub use chatkit_messenger;
pub use chatkit_protocol;

pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;

pub use bridge::Bridge;
pub use config::BridgeConfig;
