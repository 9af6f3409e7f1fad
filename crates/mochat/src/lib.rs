//! Mochat (Claw IM) channel plugin.
//!
//! Keeps per-conversation cursors in sync over a Socket.IO subscription (or
//! an HTTP long-poll fallback), dedups and gates inbound messages, batches
//! them when configured to, and hands them to the host's
//! [`ChannelEventSink`](clawlink_channels::ChannelEventSink). Replies go back
//! through the REST API.

pub mod api;
pub mod backoff;
pub mod config;
pub mod cursor_store;
pub mod dedup;
pub mod delay_buffer;
pub mod directory;
pub mod error;
pub mod event_log;
pub mod inbound;
pub mod normalize;
pub mod outbound;
pub mod pipeline;
pub mod plugin;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod socket;
pub mod state;
pub mod status;
pub mod subscription;
pub mod types;

#[cfg(test)]
mod test_support;

pub use {
    api::MochatApi,
    config::{MochatAccount, MochatAccountConfig, TransportMode},
    error::{Error, Result},
    outbound::{ResolvedTarget, resolve_target},
    plugin::MochatPlugin,
};
