//! Configuration for the plugin manager: update channels, repository hosts,
//! daemon mode, fetch retry policy and storage location.
//!
//! Config files: `iitcm.toml`, `iitcm.yaml`, `iitcm.yml` or `iitcm.json`.
//! Searched in `./` then the user config directory.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{Channel, FetchConfig, ManagerConfig, NetworkHost, StorageConfig},
};
