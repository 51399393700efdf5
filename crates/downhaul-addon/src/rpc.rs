//! RPC table of addon methods exposed to remote clients.
//!
//! Addons register typed handlers while they are being constructed. The
//! table itself knows nothing about which addons are live; the manager
//! checks liveness before resolving a handler and purges a plugin's entries
//! when it is deactivated.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{AddonError, AddonResult};
use crate::literal::parse_literal;

/// Handler bound to one exposed method. Receives positional arguments.
pub type RpcHandler = Arc<dyn Fn(Vec<Value>) -> AddonResult<Value> + Send + Sync>;

/// Build an RPC handler from a closure.
pub fn rpc_handler<F>(f: F) -> RpcHandler
where
    F: Fn(Vec<Value>) -> AddonResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Short name of a plugin: the last component of a `.` or `::` path.
pub fn short_name(full_name: &str) -> &str {
    full_name
        .rsplit(|c: char| c == '.' || c == ':')
        .next()
        .unwrap_or(full_name)
}

#[derive(Clone)]
struct RpcEntry {
    description: String,
    handler: RpcHandler,
}

/// Plugin short name → method name → entry.
#[derive(Default)]
pub struct RpcTable {
    methods: RwLock<HashMap<String, BTreeMap<String, RpcEntry>>>,
}

impl fmt::Debug for RpcTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcTable")
            .field("methods", &self.describe(|_| true))
            .finish()
    }
}

impl RpcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `method` under the plugin's short name, overwriting any
    /// previous registration of the same method.
    pub fn register(
        &self,
        plugin_full_name: &str,
        method: &str,
        description: &str,
        handler: RpcHandler,
    ) {
        let plugin = short_name(plugin_full_name);
        self.methods
            .write()
            .entry(plugin.to_string())
            .or_default()
            .insert(
                method.to_string(),
                RpcEntry {
                    description: description.trim().to_string(),
                    handler,
                },
            );
        tracing::debug!(plugin = %plugin, method = %method, "rpc method registered");
    }

    /// Drop every method of `plugin`. Returns how many were removed.
    pub fn remove_plugin(&self, plugin: &str) -> usize {
        self.methods
            .write()
            .remove(short_name(plugin))
            .map_or(0, |methods| methods.len())
    }

    /// Look up the handler for `(plugin, method)`.
    pub fn handler(&self, plugin: &str, method: &str) -> AddonResult<RpcHandler> {
        let methods = self.methods.read();
        let plugin_methods = methods
            .get(plugin)
            .ok_or_else(|| AddonError::UnknownPlugin(plugin.to_string()))?;
        plugin_methods
            .get(method)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| AddonError::UnknownMethod {
                plugin: plugin.to_string(),
                method: method.to_string(),
            })
    }

    /// Method descriptions for every plugin accepted by `include`.
    pub fn describe(
        &self,
        include: impl Fn(&str) -> bool,
    ) -> BTreeMap<String, BTreeMap<String, String>> {
        self.methods
            .read()
            .iter()
            .filter(|(plugin, _)| include(plugin))
            .map(|(plugin, methods)| {
                let described = methods
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.description.clone()))
                    .collect();
                (plugin.clone(), described)
            })
            .collect()
    }
}

/// Turn raw argument strings into call arguments.
pub fn prepare_args(args: &[String], parse: bool) -> AddonResult<Vec<Value>> {
    if parse {
        args.iter().map(|arg| parse_literal(arg)).collect()
    } else {
        Ok(args.iter().cloned().map(Value::String).collect())
    }
}
