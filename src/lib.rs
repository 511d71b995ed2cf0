//! Library root: re-exports the medium-arbitration engine, the client
//! multiplexer, configuration, CLI, error types, and the virtual time driver
//! so integration tests can drive the engine through its public API.

pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod time_driver;
