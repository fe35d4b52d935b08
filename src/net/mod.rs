//! Relay transport and wire protocol

pub mod client;
pub mod protocol;

pub use client::{NetError, RelayClient, Transport, WsTransport};
pub use protocol::{Build, Message, Quat, Vec3};
