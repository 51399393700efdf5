//! Configuration: the plugin option store and the manager's own settings.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::AddonError;

/// Option consulted to decide whether a plugin is instantiated.
pub const ACTIVATED_OPTION: &str = "activated";

/// Read access to per-plugin options. Change notifications are delivered by
/// the host to [`crate::AddonManager::plugin_config_changed`].
pub trait ConfigStore: Send + Sync {
    fn plugin_option(&self, plugin: &str, option: &str) -> Option<Value>;

    fn is_plugin_activated(&self, plugin: &str) -> bool {
        self.plugin_option(plugin, ACTIVATED_OPTION)
            .as_ref()
            .is_some_and(truthy)
    }
}

/// Interpret a configuration value as a flag.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// In-process option store, loadable from TOML.
///
/// ```toml
/// [AntiVirus]
/// activated = true
/// action = "Quarantine"
/// ```
#[derive(Debug, Default)]
pub struct MemoryConfig {
    plugins: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document with one table per plugin.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, AddonError> {
        let plugins: BTreeMap<String, BTreeMap<String, Value>> = toml::from_str(toml_str)?;
        Ok(Self {
            plugins: RwLock::new(plugins),
        })
    }

    pub fn load(path: &Path) -> Result<Self, AddonError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Set an option, returning the previous value.
    pub fn set_plugin_option(&self, plugin: &str, option: &str, value: Value) -> Option<Value> {
        self.plugins
            .write()
            .entry(plugin.to_string())
            .or_default()
            .insert(option.to_string(), value)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }
}

impl ConfigStore for MemoryConfig {
    fn plugin_option(&self, plugin: &str, option: &str) -> Option<Value> {
        self.plugins
            .read()
            .get(plugin)
            .and_then(|options| options.get(option))
            .cloned()
    }
}

// ─── Manager settings ───────────────────────────────────────────────────

/// Settings of the addon manager itself.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Loader category addons are resolved from (default: `addon`).
    pub category: String,
    /// Background hooks that may run at once (default: 4). Further jobs,
    /// including the `coreReady` submitted on activation, queue until a
    /// running one finishes.
    pub worker_threads: usize,
    /// Thread name of background workers (default: `addon-worker`).
    pub thread_name: String,
    /// Emit a debug summary after every hook dispatch (default: false).
    pub log_dispatch: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            category: "addon".to_string(),
            worker_threads: 4,
            thread_name: "addon-worker".to_string(),
            log_dispatch: false,
        }
    }
}

impl ManagerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            category: std::env::var("ADDON_CATEGORY").unwrap_or(defaults.category),
            worker_threads: std::env::var("ADDON_WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_threads),
            thread_name: std::env::var("ADDON_THREAD_NAME").unwrap_or(defaults.thread_name),
            log_dispatch: std::env::var("ADDON_LOG_DISPATCH")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}
