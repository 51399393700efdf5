//! Addon manager: activation, lifecycle dispatch and RPC routing.
//!
//! The `AddonManager` is the central orchestrator of the addon system. It
//! builds the active set from configuration at startup, activates and
//! deactivates addons when their `activated` option changes, delivers the
//! fixed lifecycle hooks to every active addon and then fires the matching
//! event on its [`EventBus`].
//!
//! Guarded hooks iterate under a reentrant lock that also serializes
//! activation and deactivation, so an addon may deactivate itself from inside
//! a hook. Every hook iterates a snapshot of the active set.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::addon::{call_hook, Addon, AddonContext, AddonHost, HookArgs, PluginLoader};
use crate::background::BackgroundDispatcher;
use crate::config::{truthy, ManagerConfig, ACTIVATED_OPTION};
use crate::error::{AddonError, AddonResult};
use crate::events::{
    listener, DownloadFile, EventArg, EventBus, Hook, Listener, Package, PLUGIN_CONFIG_CHANGED,
};
use crate::guard::guarded;
use crate::rpc::{prepare_args, short_name, RpcHandler, RpcTable};

/// An activated addon in the active set.
#[derive(Clone)]
struct LoadedAddon {
    /// Short name, the same key the RPC table uses.
    name: String,
    instance: Arc<dyn Addon>,
}

/// Result of one lifecycle dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// Addons whose hook ran inline.
    pub inline: usize,
    /// Addons whose hook was handed to the background pool.
    pub submitted: usize,
    /// Addons whose hook failed.
    pub failed: usize,
    /// True when a failure stopped the remaining addons and the event.
    pub aborted: bool,
    /// Listeners that handled the bus event without failure.
    pub listeners: usize,
}

/// Central addon manager.
pub struct AddonManager {
    config: ManagerConfig,
    host: AddonHost,
    loader: Arc<dyn PluginLoader>,
    /// Active set in activation order; names are unique.
    index: RwLock<Vec<LoadedAddon>>,
    /// Serializes activation, deactivation and the guarded hooks.
    dispatch_lock: ReentrantMutex<()>,
    events: EventBus,
    rpc: RpcTable,
    background: BackgroundDispatcher,
    self_ref: Weak<AddonManager>,
}

impl AddonManager {
    /// Create a manager with its own worker pool and build the active set.
    pub fn new(
        host: AddonHost,
        loader: Arc<dyn PluginLoader>,
        config: ManagerConfig,
    ) -> AddonResult<Arc<Self>> {
        let background = BackgroundDispatcher::new(&config)?;
        Ok(Self::with_background(host, loader, config, background))
    }

    /// Create a manager on an existing background dispatcher and build the
    /// active set.
    pub fn with_background(
        host: AddonHost,
        loader: Arc<dyn PluginLoader>,
        config: ManagerConfig,
        background: BackgroundDispatcher,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| Self {
            config,
            host,
            loader,
            index: RwLock::new(Vec::new()),
            dispatch_lock: ReentrantMutex::new(()),
            events: EventBus::new(),
            rpc: RpcTable::new(),
            background,
            self_ref: self_ref.clone(),
        });

        let weak = Arc::downgrade(&manager);
        manager.events.register(
            PLUGIN_CONFIG_CHANGED,
            listener(move |args| match weak.upgrade() {
                Some(manager) => manager.on_plugin_config_changed(args),
                None => Ok(()),
            }),
        );

        manager.build_index();
        manager
    }

    /// Weak handle to this manager.
    pub fn handle(&self) -> Weak<AddonManager> {
        self.self_ref.clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn background(&self) -> &BackgroundDispatcher {
        &self.background
    }

    // ── Activation ───────────────────────────────────────────────────

    /// Instantiate every plugin whose configuration marks it activated.
    fn build_index(&self) {
        let _guard = self.dispatch_lock.lock();
        let mut activated = Vec::new();
        let mut deactivated = Vec::new();

        for name in self.loader.plugin_names(&self.config.category) {
            if !self.host.config.is_plugin_activated(&name) {
                deactivated.push(name);
                continue;
            }
            if self.is_loaded(&name) {
                continue;
            }
            match self.instantiate(&name) {
                Ok(instance) => {
                    let key = short_name(&name).to_string();
                    if instance.is_activated() {
                        activated.push(key.clone());
                    }
                    self.index.write().push(LoadedAddon {
                        name: key,
                        instance,
                    });
                }
                Err(e) => tracing::warn!(plugin = %name, "failed activating plugin: {e}"),
            }
        }

        activated.sort();
        deactivated.sort();
        tracing::info!("activated plugins: {}", activated.join(", "));
        tracing::info!("deactivated plugins: {}", deactivated.join(", "));
    }

    /// Resolve and construct `name`. Methods registered by a failed
    /// constructor are dropped again.
    fn instantiate(&self, name: &str) -> AddonResult<Arc<dyn Addon>> {
        let class = self.loader.load_class(&self.config.category, name)?;
        let ctx = AddonContext::new(name, &self.host, self);
        class.instantiate(&ctx).inspect_err(|_| {
            self.rpc.remove_plugin(name);
        })
    }

    /// Activate `name` unless it is already loaded. Its `coreReady` hook is
    /// run in the background. Returns whether a new instance was created.
    pub fn activate(&self, name: &str) -> bool {
        let _guard = self.dispatch_lock.lock();
        if self.is_loaded(name) {
            return false;
        }

        let instance = match self.instantiate(name) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(plugin = %name, "plugin activation failed: {e}");
                return false;
            }
        };

        let key = short_name(name);
        self.index.write().push(LoadedAddon {
            name: key.to_string(),
            instance: Arc::clone(&instance),
        });
        tracing::info!(plugin = %key, "plugin loaded");

        self.background
            .submit(format!("{key}.{}", Hook::CoreReady), move || {
                instance.core_ready()
            });
        true
    }

    /// Deactivate `name`: unload it, drop its periodic job, its RPC methods
    /// and its slot in the active set. Teardown failures are logged and do
    /// not keep the addon loaded. Returns whether an addon was removed.
    pub fn deactivate(&self, name: &str) -> bool {
        let _guard = self.dispatch_lock.lock();
        let name = short_name(name);
        let removed = {
            let mut index = self.index.write();
            let pos = index.iter().position(|entry| entry.name == name);
            pos.map(|pos| index.remove(pos))
        };
        let Some(entry) = removed else {
            tracing::info!(plugin = %name, "plugin not loaded, nothing to deactivate");
            return false;
        };

        let methods = self.rpc.remove_plugin(name);

        if let Err(e) = guarded(&format!("{name}.unload"), || entry.instance.unload()) {
            tracing::error!(plugin = %name, "plugin unload failed: {e}");
        }

        match guarded(&format!("{name}.periodic_job"), || {
            Ok(entry.instance.periodic_job())
        }) {
            Ok(Some(job)) => {
                let removed = self.host.scheduler.remove_job(job);
                tracing::debug!(plugin = %name, job = ?job, removed, "removed periodic job");
            }
            Ok(None) => {}
            Err(e) => tracing::error!(plugin = %name, "periodic job lookup failed: {e}"),
        }

        tracing::info!(plugin = %name, rpc_methods = methods, "plugin unloaded");
        true
    }

    /// Apply a change of a plugin option. Only `activated` is acted upon.
    pub fn manage_addon(&self, plugin: &str, option: &str, activated: bool) {
        if option != ACTIVATED_OPTION {
            return;
        }
        if activated {
            self.activate(plugin);
        } else {
            self.deactivate(plugin);
        }
    }

    /// Entry point for the configuration store: fires `pluginConfigChanged`
    /// with `(plugin, option, value)`.
    pub fn plugin_config_changed(&self, plugin: &str, option: &str, value: Value) -> usize {
        self.events.fire(
            PLUGIN_CONFIG_CHANGED,
            &[
                EventArg::Text(plugin.to_string()),
                EventArg::Text(option.to_string()),
                EventArg::Value(value),
            ],
        )
    }

    fn on_plugin_config_changed(&self, args: &[EventArg]) -> AddonResult {
        let plugin = args.first().and_then(EventArg::as_text);
        let option = args.get(1).and_then(EventArg::as_text);
        let (Some(plugin), Some(option), Some(value)) = (plugin, option, args.get(2)) else {
            return Err(AddonError::Hook(format!(
                "malformed {PLUGIN_CONFIG_CHANGED} arguments"
            )));
        };
        let activated = match value {
            EventArg::Value(value) => truthy(value),
            EventArg::Text(text) => truthy(&Value::String(text.clone())),
            _ => false,
        };
        self.manage_addon(plugin, option, activated);
        Ok(())
    }

    // ── Lifecycle hooks ──────────────────────────────────────────────

    pub fn core_ready(&self) -> DispatchOutcome {
        self.dispatch(Hook::CoreReady, HookArgs::None)
    }

    pub fn core_exiting(&self) -> DispatchOutcome {
        self.dispatch(Hook::CoreExiting, HookArgs::None)
    }

    pub fn download_preparing(&self, file: Arc<DownloadFile>) -> DispatchOutcome {
        self.dispatch(Hook::DownloadPreparing, HookArgs::File(file))
    }

    pub fn download_finished(&self, file: Arc<DownloadFile>) -> DispatchOutcome {
        self.dispatch(Hook::DownloadFinished, HookArgs::File(file))
    }

    pub fn download_failed(&self, file: Arc<DownloadFile>) -> DispatchOutcome {
        self.dispatch(Hook::DownloadFailed, HookArgs::File(file))
    }

    pub fn package_finished(&self, package: Arc<Package>) -> DispatchOutcome {
        self.dispatch(Hook::PackageFinished, HookArgs::Package(package))
    }

    /// Delivered to every loaded addon, whatever its activation predicate.
    pub fn before_reconnecting(&self, address: &str) -> DispatchOutcome {
        self.dispatch(Hook::BeforeReconnecting, HookArgs::Address(address.into()))
    }

    pub fn after_reconnecting(&self, address: &str) -> DispatchOutcome {
        self.dispatch(Hook::AfterReconnecting, HookArgs::Address(address.into()))
    }

    fn dispatch(&self, hook: Hook, args: HookArgs) -> DispatchOutcome {
        let guard = hook.is_locked().then(|| self.dispatch_lock.lock());
        let snapshot: Vec<LoadedAddon> = self.index.read().clone();
        let mut outcome = DispatchOutcome::default();

        for entry in &snapshot {
            match self.deliver(entry, hook, &args) {
                Ok(Delivery::Skipped) => {}
                Ok(Delivery::Inline) => outcome.inline += 1,
                Ok(Delivery::Submitted) => outcome.submitted += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(plugin = %entry.name, hook = %hook, "error executing addon: {e}");
                    if hook.aborts_on_failure() {
                        outcome.aborted = true;
                        break;
                    }
                }
            }
        }
        drop(guard);

        if self.config.log_dispatch {
            tracing::debug!(
                hook = %hook,
                inline = outcome.inline,
                submitted = outcome.submitted,
                failed = outcome.failed,
                aborted = outcome.aborted,
                "hook dispatched"
            );
        }

        if !outcome.aborted {
            outcome.listeners = self.events.fire(hook.event_name(), &args.to_event_args());
        }
        outcome
    }

    fn deliver(&self, entry: &LoadedAddon, hook: Hook, args: &HookArgs) -> AddonResult<Delivery> {
        let op = format!("{}.{hook}", entry.name);
        guarded(&op, || {
            if !hook.ignores_activation() && !entry.instance.is_activated() {
                return Ok(Delivery::Skipped);
            }
            if entry.instance.threaded_hooks().contains(&hook) {
                let instance = Arc::clone(&entry.instance);
                let args = args.clone();
                self.background.submit(op.clone(), move || {
                    call_hook(instance.as_ref(), hook, &args)
                });
                return Ok(Delivery::Submitted);
            }
            call_hook(entry.instance.as_ref(), hook, args)?;
            Ok(Delivery::Inline)
        })
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Add an event listener for `event`.
    pub fn add_event(&self, event: &str, listener: Listener) -> bool {
        self.events.register(event, listener)
    }

    /// Remove a previously added event listener.
    pub fn remove_event(&self, event: &str, listener: &Listener) -> bool {
        self.events.unregister(event, listener)
    }

    /// Fire `event` with `args` on the bus.
    pub fn dispatch_event(&self, event: &str, args: &[EventArg]) -> usize {
        self.events.fire(event, args)
    }

    // ── RPC ──────────────────────────────────────────────────────────

    /// Expose `method` of `plugin_full_name` to RPC clients.
    pub fn register_method(
        &self,
        plugin_full_name: &str,
        method: &str,
        description: &str,
        handler: RpcHandler,
    ) {
        self.rpc
            .register(plugin_full_name, method, description, handler);
    }

    /// Call an exposed method of a loaded addon. With `parse`, every
    /// argument is parsed as a literal first; otherwise it is passed as a
    /// string. The handler's result is returned unchanged.
    pub fn invoke(
        &self,
        plugin: &str,
        method: &str,
        args: &[String],
        parse: bool,
    ) -> AddonResult<Value> {
        if !self.is_loaded(plugin) {
            return Err(AddonError::UnknownPlugin(plugin.to_string()));
        }
        let handler = self
            .rpc
            .handler(plugin, method)
            .map_err(|e| match e {
                AddonError::UnknownPlugin(_) => AddonError::UnknownMethod {
                    plugin: plugin.to_string(),
                    method: method.to_string(),
                },
                other => other,
            })?;
        let args = prepare_args(args, parse)?;
        guarded(&format!("{plugin}.{method}"), || handler(args))
    }

    /// Exposed methods and their descriptions, for loaded addons only.
    pub fn list_methods(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let loaded = self.loaded_names();
        self.rpc.describe(|plugin| loaded.iter().any(|name| name == plugin))
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Whether `name` is in the active set. Qualified names match by their
    /// last component.
    pub fn is_loaded(&self, name: &str) -> bool {
        let name = short_name(name);
        self.index.read().iter().any(|entry| entry.name == name)
    }

    pub fn loaded_count(&self) -> usize {
        self.index.read().len()
    }

    /// Names of loaded addons in activation order.
    pub fn loaded_names(&self) -> Vec<String> {
        self.index
            .read()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn instance(&self, name: &str) -> Option<Arc<dyn Addon>> {
        let name = short_name(name);
        self.index
            .read()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.instance))
    }

    /// Loaded addons whose activation predicate currently holds.
    pub fn active_plugins(&self) -> Vec<Arc<dyn Addon>> {
        let snapshot: Vec<LoadedAddon> = self.index.read().clone();
        snapshot
            .into_iter()
            .filter(|entry| {
                guarded(&format!("{}.is_activated", entry.name), || {
                    Ok(entry.instance.is_activated())
                })
                .unwrap_or(false)
            })
            .map(|entry| entry.instance)
            .collect()
    }

    /// Info maps of all loaded addons that provide one.
    pub fn all_info(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let snapshot: Vec<LoadedAddon> = self.index.read().clone();
        snapshot
            .iter()
            .filter_map(|entry| {
                let info = addon_info(entry);
                (!info.is_empty()).then(|| (entry.name.clone(), info))
            })
            .collect()
    }

    /// Info map of `plugin`; empty when it is not loaded.
    pub fn info(&self, plugin: &str) -> BTreeMap<String, String> {
        let plugin = short_name(plugin);
        let entry = self
            .index
            .read()
            .iter()
            .find(|entry| entry.name == plugin)
            .cloned();
        entry.map(|entry| addon_info(&entry)).unwrap_or_default()
    }
}

impl std::fmt::Debug for AddonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonManager")
            .field("config", &self.config)
            .field("loaded", &self.loaded_names())
            .field("events", &self.events)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

enum Delivery {
    Skipped,
    Inline,
    Submitted,
}

/// Stringified info of one addon; failures yield an empty map.
fn addon_info(entry: &LoadedAddon) -> BTreeMap<String, String> {
    match guarded(&format!("{}.info", entry.name), || Ok(entry.instance.info())) {
        Ok(info) => info
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect(),
        Err(e) => {
            tracing::warn!(plugin = %entry.name, "failed reading addon info: {e}");
            BTreeMap::new()
        }
    }
}
