//! Configuration loading for clawlink.
//!
//! Config files: `clawlink.toml`, `clawlink.yaml`, or `clawlink.json`,
//! searched in `./` then the user config directory.
//!
//! `${ENV_VAR}` placeholders are substituted before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::{ChannelsConfig, ClawlinkConfig, ResponderConfig},
};
