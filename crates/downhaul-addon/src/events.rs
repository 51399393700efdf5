//! Addon event system: lifecycle hooks, event payloads and the event bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AddonResult;
use crate::guard::guarded;

/// Event fired when a plugin option changes; the manager listens to it.
pub const PLUGIN_CONFIG_CHANGED: &str = "pluginConfigChanged";

/// Known event names. The first eight are fired by the lifecycle
/// dispatcher; the rest are fired by other parts of the host.
pub const KNOWN_EVENTS: &[&str] = &[
    "coreReady",
    "coreExiting",
    "downloadPreparing",
    "downloadFinished",
    "downloadFailed",
    "packageFinished",
    "beforeReconnecting",
    "afterReconnecting",
    "downloadStarts",
    "linksAdded",
    "allDownloadsProcessed",
    "allDownloadsFinished",
    "unrarFinished",
    "configChanged",
    PLUGIN_CONFIG_CHANGED,
];

/// Fixed lifecycle hooks every addon may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hook {
    CoreReady,
    CoreExiting,
    DownloadPreparing,
    DownloadFinished,
    DownloadFailed,
    PackageFinished,
    BeforeReconnecting,
    AfterReconnecting,
}

impl Hook {
    pub const ALL: [Hook; 8] = [
        Hook::CoreReady,
        Hook::CoreExiting,
        Hook::DownloadPreparing,
        Hook::DownloadFinished,
        Hook::DownloadFailed,
        Hook::PackageFinished,
        Hook::BeforeReconnecting,
        Hook::AfterReconnecting,
    ];

    /// Name of the bus event fired after this hook.
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::CoreReady => "coreReady",
            Self::CoreExiting => "coreExiting",
            Self::DownloadPreparing => "downloadPreparing",
            Self::DownloadFinished => "downloadFinished",
            Self::DownloadFailed => "downloadFailed",
            Self::PackageFinished => "packageFinished",
            Self::BeforeReconnecting => "beforeReconnecting",
            Self::AfterReconnecting => "afterReconnecting",
        }
    }

    /// Hooks that iterate under the dispatch lock.
    pub const fn is_locked(self) -> bool {
        !matches!(
            self,
            Self::CoreReady | Self::CoreExiting | Self::BeforeReconnecting
        )
    }

    /// Hooks where the first failure aborts the remaining addons.
    pub const fn aborts_on_failure(self) -> bool {
        matches!(
            self,
            Self::CoreReady | Self::CoreExiting | Self::DownloadFailed
        )
    }

    /// Hooks delivered to addons even when their activation predicate is false.
    pub const fn ignores_activation(self) -> bool {
        matches!(self, Self::BeforeReconnecting)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

// ─── Event payload types ─────────────────────────────────────────────

/// Status of a download as reported by the download engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Queued,
    Preparing,
    Downloading,
    Processing,
    Finished,
    Failed,
    Aborted,
}

/// A single download handed to the hooks by the download engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFile {
    pub id: u64,
    pub name: String,
    pub package_id: u64,
    pub status: FileStatus,
    #[serde(default)]
    pub path: Option<String>,
}

/// A package (group of downloads) handed to `packageFinished`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: u64,
    pub name: String,
    pub folder: String,
}

/// One positional argument of a fired event.
#[derive(Debug, Clone)]
pub enum EventArg {
    File(Arc<DownloadFile>),
    Package(Arc<Package>),
    Text(String),
    Value(serde_json::Value),
}

impl EventArg {
    pub fn as_file(&self) -> Option<&Arc<DownloadFile>> {
        match self {
            Self::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_package(&self) -> Option<&Arc<Package>> {
        match self {
            Self::Package(package) => Some(package),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Value(serde_json::Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

// ─── Event bus ───────────────────────────────────────────────────────

/// Listener callback. Identity is the `Arc` allocation.
pub type Listener = Arc<dyn Fn(&[EventArg]) -> AddonResult + Send + Sync>;

/// Build a listener from a closure.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&[EventArg]) -> AddonResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Generic publish/subscribe registry keyed by event name.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` for `event`. Returns false if it was already registered.
    pub fn register(&self, event: &str, listener: Listener) -> bool {
        let mut listeners = self.listeners.write();
        let list = listeners.entry(event.to_string()).or_default();
        if list.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Remove `listener` from `event`. Returns false if it was not registered.
    pub fn unregister(&self, event: &str, listener: &Listener) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        list.len() != before
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Deliver `args` to every listener of `event` in registration order.
    ///
    /// Delivery works on a snapshot taken before the first listener runs, so
    /// listeners may register or unregister without affecting this fire.
    /// Returns the number of listeners that completed without failure.
    pub fn fire(&self, event: &str, args: &[EventArg]) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.read().get(event) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return 0,
        };

        let mut delivered = 0;
        for listener in &snapshot {
            match guarded(event, || listener(args)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        event = %event,
                        listener = ?Arc::as_ptr(listener),
                        args = ?args,
                        "error calling event handler: {e}"
                    );
                }
            }
        }
        delivered
    }
}
