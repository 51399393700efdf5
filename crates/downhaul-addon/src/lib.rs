//! Downhaul addon core
//!
//! Lifecycle and event dispatch for download manager addons. Addons are
//! activated from configuration, receive the fixed lifecycle hooks inline or
//! on a background pool, can subscribe to arbitrary events on the event bus,
//! and expose methods to remote clients through the RPC table.

pub mod addon;
pub mod background;
pub mod config;
pub mod error;
pub mod events;
mod guard;
pub mod literal;
pub mod manager;
pub mod rpc;

pub use addon::{
    Addon, AddonClass, AddonContext, AddonHost, JobHandle, NoopScheduler, PluginLoader,
    Scheduler, StaticLoader,
};
pub use background::{BackgroundDispatcher, BackgroundTask};
pub use config::{ConfigStore, ManagerConfig, MemoryConfig, ACTIVATED_OPTION};
pub use error::{AddonError, AddonResult};
pub use events::{
    listener, DownloadFile, EventArg, EventBus, FileStatus, Hook, Listener, Package,
    KNOWN_EVENTS, PLUGIN_CONFIG_CHANGED,
};
pub use literal::parse_literal;
pub use manager::{AddonManager, DispatchOutcome};
pub use rpc::{rpc_handler, RpcHandler, RpcTable};
