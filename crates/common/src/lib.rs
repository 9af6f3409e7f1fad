//! Shared types used across clawlink crates.

pub mod types;

pub use types::{ChatType, MediaAttachment, ReplyPayload};
