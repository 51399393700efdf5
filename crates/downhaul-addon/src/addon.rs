//! Addon capability contract and the collaborators addons are built from.
//!
//! An addon is any type implementing [`Addon`]. Every lifecycle hook has a
//! no-op default, so an addon only overrides what it reacts to. Addons are
//! produced by an [`AddonClass`] resolved through a [`PluginLoader`], and
//! receive an [`AddonContext`] during construction instead of reaching for a
//! process-wide registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::error::{AddonError, AddonResult};
use crate::events::{DownloadFile, Hook, Package};
use crate::manager::AddonManager;
use crate::rpc::RpcHandler;

/// Handle of a periodic job registered with the host scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub u64);

/// Capability set of an addon instance.
pub trait Addon: Send + Sync {
    /// Activation predicate checked before each hook delivery.
    fn is_activated(&self) -> bool {
        true
    }

    /// Hooks that must run on the background pool instead of inline.
    fn threaded_hooks(&self) -> &[Hook] {
        &[]
    }

    fn core_ready(&self) -> AddonResult {
        Ok(())
    }

    fn core_exiting(&self) -> AddonResult {
        Ok(())
    }

    fn download_preparing(&self, _file: &DownloadFile) -> AddonResult {
        Ok(())
    }

    fn download_finished(&self, _file: &DownloadFile) -> AddonResult {
        Ok(())
    }

    fn download_failed(&self, _file: &DownloadFile) -> AddonResult {
        Ok(())
    }

    fn package_finished(&self, _package: &Package) -> AddonResult {
        Ok(())
    }

    fn before_reconnecting(&self, _address: &str) -> AddonResult {
        Ok(())
    }

    fn after_reconnecting(&self, _address: &str) -> AddonResult {
        Ok(())
    }

    /// Teardown before the instance is dropped from the active set.
    fn unload(&self) -> AddonResult {
        Ok(())
    }

    /// Periodic job to remove from the scheduler on deactivation.
    fn periodic_job(&self) -> Option<JobHandle> {
        None
    }

    /// Free-form status information shown to clients.
    fn info(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }
}

/// Arguments of one hook invocation, owned so it can cross to a worker.
#[derive(Debug, Clone)]
pub(crate) enum HookArgs {
    None,
    File(Arc<DownloadFile>),
    Package(Arc<Package>),
    Address(Arc<str>),
}

impl HookArgs {
    pub(crate) fn to_event_args(&self) -> Vec<crate::events::EventArg> {
        use crate::events::EventArg;
        match self {
            Self::None => Vec::new(),
            Self::File(file) => vec![EventArg::File(Arc::clone(file))],
            Self::Package(package) => vec![EventArg::Package(Arc::clone(package))],
            Self::Address(address) => vec![EventArg::Text(address.to_string())],
        }
    }
}

/// Call `hook` on `addon`. Mismatched arguments are a host bug and are
/// reported as a hook error rather than silently skipped.
pub(crate) fn call_hook(addon: &dyn Addon, hook: Hook, args: &HookArgs) -> AddonResult {
    match (hook, args) {
        (Hook::CoreReady, HookArgs::None) => addon.core_ready(),
        (Hook::CoreExiting, HookArgs::None) => addon.core_exiting(),
        (Hook::DownloadPreparing, HookArgs::File(f)) => addon.download_preparing(f),
        (Hook::DownloadFinished, HookArgs::File(f)) => addon.download_finished(f),
        (Hook::DownloadFailed, HookArgs::File(f)) => addon.download_failed(f),
        (Hook::PackageFinished, HookArgs::Package(p)) => addon.package_finished(p),
        (Hook::BeforeReconnecting, HookArgs::Address(a)) => addon.before_reconnecting(a),
        (Hook::AfterReconnecting, HookArgs::Address(a)) => addon.after_reconnecting(a),
        (hook, args) => Err(AddonError::Hook(format!(
            "{hook} called with mismatched arguments {args:?}"
        ))),
    }
}

// ─── Host collaborators ──────────────────────────────────────────────

/// Job scheduler owned by the host.
pub trait Scheduler: Send + Sync {
    /// Remove a periodic job. Returns whether a job was removed.
    fn remove_job(&self, job: JobHandle) -> bool;
}

/// Scheduler for hosts without periodic jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn remove_job(&self, _job: JobHandle) -> bool {
        false
    }
}

/// Host services handed to every addon constructor.
#[derive(Clone)]
pub struct AddonHost {
    pub config: Arc<dyn ConfigStore>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl AddonHost {
    pub fn new(config: Arc<dyn ConfigStore>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { config, scheduler }
    }
}

impl fmt::Debug for AddonHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonHost").finish_non_exhaustive()
    }
}

/// Construction context: the host plus the manager creating the addon.
pub struct AddonContext<'a> {
    name: &'a str,
    host: &'a AddonHost,
    manager: &'a AddonManager,
}

impl<'a> AddonContext<'a> {
    pub(crate) fn new(name: &'a str, host: &'a AddonHost, manager: &'a AddonManager) -> Self {
        Self {
            name,
            host,
            manager,
        }
    }

    /// Name the addon is being activated under.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn host(&self) -> &AddonHost {
        self.host
    }

    pub fn manager(&self) -> &AddonManager {
        self.manager
    }

    /// Weak handle for addons that call back into the manager later.
    pub fn manager_handle(&self) -> Weak<AddonManager> {
        self.manager.handle()
    }

    /// Read one of this addon's configuration options.
    pub fn option(&self, option: &str) -> Option<serde_json::Value> {
        self.host.config.plugin_option(self.name, option)
    }

    /// Expose `method` to RPC clients under this addon's name.
    pub fn expose(&self, method: &str, description: &str, handler: RpcHandler) {
        self.manager
            .register_method(self.name, method, description, handler);
    }
}

// ─── Classes and loaders ─────────────────────────────────────────────

trait Construct: Send + Sync {
    fn construct(&self, ctx: &AddonContext<'_>) -> AddonResult<Arc<dyn Addon>>;
}

struct Typed<F, A>(F, PhantomData<fn() -> A>);

impl<F, A> Construct for Typed<F, A>
where
    A: Addon + 'static,
    F: Fn(&AddonContext<'_>) -> AddonResult<A> + Send + Sync,
{
    fn construct(&self, ctx: &AddonContext<'_>) -> AddonResult<Arc<dyn Addon>> {
        (self.0)(ctx).map(|addon| Arc::new(addon) as Arc<dyn Addon>)
    }
}

/// A resolved addon type: a name plus a constructor.
#[derive(Clone)]
pub struct AddonClass {
    name: String,
    constructor: Arc<dyn Construct>,
}

impl AddonClass {
    pub fn new<A, F>(name: impl Into<String>, constructor: F) -> Self
    where
        A: Addon + 'static,
        F: Fn(&AddonContext<'_>) -> AddonResult<A> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            constructor: Arc::new(Typed(constructor, PhantomData)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(&self, ctx: &AddonContext<'_>) -> AddonResult<Arc<dyn Addon>> {
        crate::guard::guarded(&format!("{}::new", self.name), || {
            self.constructor.construct(ctx)
        })
    }
}

impl fmt::Debug for AddonClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonClass")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Resolves plugin names to addon classes.
pub trait PluginLoader: Send + Sync {
    /// Every plugin name known for `category`, in discovery order.
    fn plugin_names(&self, category: &str) -> Vec<String>;

    /// Resolve `name`; `NotFound` or `Load` on failure.
    fn load_class(&self, category: &str, name: &str) -> AddonResult<AddonClass>;
}

/// In-memory loader for hosts that link their addons statically.
#[derive(Default)]
pub struct StaticLoader {
    classes: RwLock<HashMap<String, Vec<AddonClass>>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `class` under `category`, replacing a class with the same name.
    pub fn add(&self, category: &str, class: AddonClass) {
        let mut classes = self.classes.write();
        let list = classes.entry(category.to_string()).or_default();
        list.retain(|c| c.name != class.name);
        list.push(class);
    }

    pub fn with(self, category: &str, class: AddonClass) -> Self {
        self.add(category, class);
        self
    }
}

impl PluginLoader for StaticLoader {
    fn plugin_names(&self, category: &str) -> Vec<String> {
        self.classes
            .read()
            .get(category)
            .map(|list| list.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    fn load_class(&self, category: &str, name: &str) -> AddonResult<AddonClass> {
        self.classes
            .read()
            .get(category)
            .and_then(|list| list.iter().find(|c| c.name == name).cloned())
            .ok_or_else(|| AddonError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FileStatus;

    struct Quiet;
    impl Addon for Quiet {}

    fn file() -> Arc<DownloadFile> {
        Arc::new(DownloadFile {
            id: 1,
            name: "a".into(),
            package_id: 1,
            status: FileStatus::Finished,
            path: None,
        })
    }

    #[test]
    fn test_default_capabilities() {
        let addon = Quiet;
        assert!(addon.is_activated());
        assert!(addon.threaded_hooks().is_empty());
        assert!(addon.periodic_job().is_none());
        assert!(addon.info().is_empty());
        assert!(addon.unload().is_ok());
    }

    #[test]
    fn test_call_hook_routes_every_hook() {
        let addon = Quiet;
        let package = Arc::new(Package {
            id: 1,
            name: "p".into(),
            folder: "p".into(),
        });
        for hook in Hook::ALL {
            let args = match hook {
                Hook::CoreReady | Hook::CoreExiting => HookArgs::None,
                Hook::PackageFinished => HookArgs::Package(Arc::clone(&package)),
                Hook::BeforeReconnecting | Hook::AfterReconnecting => {
                    HookArgs::Address("10.0.0.1".into())
                }
                _ => HookArgs::File(file()),
            };
            assert!(call_hook(&addon, hook, &args).is_ok(), "{hook}");
        }
    }

    #[test]
    fn test_call_hook_rejects_mismatched_args() {
        let err = call_hook(&Quiet, Hook::DownloadFinished, &HookArgs::None).unwrap_err();
        assert!(matches!(err, AddonError::Hook(_)));
    }

    #[test]
    fn test_hook_args_to_event_args() {
        assert!(HookArgs::None.to_event_args().is_empty());
        let args = HookArgs::Address("1.2.3.4".into()).to_event_args();
        assert_eq!(args[0].as_text(), Some("1.2.3.4"));
        let args = HookArgs::File(file()).to_event_args();
        assert_eq!(args[0].as_file().map(|f| f.id), Some(1));
    }

    #[test]
    fn test_static_loader_resolves_by_name() {
        let loader = StaticLoader::new()
            .with("addon", AddonClass::new("A", |_| Ok(Quiet)))
            .with("addon", AddonClass::new("B", |_| Ok(Quiet)));

        assert_eq!(loader.plugin_names("addon"), vec!["A", "B"]);
        assert!(loader.plugin_names("hoster").is_empty());
        assert_eq!(loader.load_class("addon", "B").unwrap().name(), "B");
        assert!(matches!(
            loader.load_class("addon", "C"),
            Err(AddonError::NotFound(_))
        ));
    }

    #[test]
    fn test_static_loader_replaces_same_name() {
        let loader = StaticLoader::new();
        loader.add("addon", AddonClass::new("A", |_| Ok(Quiet)));
        loader.add("addon", AddonClass::new("A", |_| Ok(Quiet)));
        assert_eq!(loader.plugin_names("addon").len(), 1);
    }

    #[test]
    fn test_noop_scheduler() {
        assert!(!NoopScheduler.remove_job(JobHandle(1)));
    }
}
