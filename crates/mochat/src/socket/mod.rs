//! Socket.IO transport over a WebSocket (JSON text framing only).

pub mod client;
pub mod packet;

pub use client::{CLIENT_DISCONNECT, SocketClient, SocketEmitter, SocketEvent, SocketOptions};
