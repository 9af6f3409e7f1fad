//! Channel plugin system.
//!
//! A channel backend implements [`ChannelPlugin`] with sub-traits for
//! outbound messaging and status, and reports inbound traffic to the host
//! through a [`ChannelEventSink`].

pub mod error;
pub mod gating;
pub mod plugin;
pub mod registry;

pub use {
    error::{Error, Result},
    plugin::{
        ChannelEvent, ChannelEventSink, ChannelHealthSnapshot, ChannelMessageMeta,
        ChannelOutbound, ChannelPlugin, ChannelReplyTarget, ChannelStatus,
    },
    registry::ChannelRegistry,
};
