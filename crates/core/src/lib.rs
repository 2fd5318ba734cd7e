//! Plugin and update synchronization engine for IITC-style userscripts.
//!
//! Keeps each update channel's plugin state (catalog, cached built-in
//! plugins, user scripts and the core script) reconciled against its remote
//! repository, exposes the plugin lifecycle and reports every effective
//! change to the host as an add/update/remove event.

pub mod channel;
pub mod error;
pub mod events;
pub mod fetch;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod meta;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod sync;
pub mod types;
pub mod uid;

pub use {
    error::{Error, Result},
    events::{EventKind, EventPlugin, PluginEvent, SourceHint},
    host::Host,
    http::{HttpClient, ReqwestClient, RequestKind},
    iitcm_config::{Channel, FetchConfig, ManagerConfig, NetworkHost},
    manager::Manager,
    meta::parse_meta,
    scheduler::SyncLoop,
    store::Store,
    store_file::FileStore,
    store_memory::InMemoryStore,
    types::{
        Category, CoreRecord, Meta, PluginAction, PluginMap, PluginRecord, PluginStatus,
        UserScript,
    },
    uid::resolve_uid,
};
