//! pin-relay: rendezvous and relay broker for PIN-paired connections
//!
//! A PC agent and a user client each open a WebSocket to this server using a
//! shared PIN; the server pairs the two legs and relays application frames
//! between them in both directions.

pub mod api;
pub mod config;
pub mod envelope;
pub mod metrics;
pub mod pairing;
pub mod registry;
pub mod relay;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use server::RelayServer;
