pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod model;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod transfer;
pub mod transport;
