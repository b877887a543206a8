pub mod analysis;
pub mod channel;
pub mod chat;
pub mod config;
pub mod desktop;
pub mod error;
pub mod files;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod signaling;
pub mod state;
pub mod transfer;
pub mod transport;
pub mod utils;
