// Shared test utilities for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::{Duration, Instant};

use downhaul_addon::{
    Addon, AddonClass, AddonError, AddonHost, AddonManager, AddonResult, DownloadFile, FileStatus,
    Hook, JobHandle, ManagerConfig, MemoryConfig, Package, Scheduler, StaticLoader,
};

static TRACING: Once = Once::new();

/// Route manager logs to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Ordered record of hook calls, formatted as `name:hook:detail`.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Poll `journal` until it contains `entry`.
pub fn wait_for(journal: &Journal, entry: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if journal.lock().unwrap().iter().any(|e| e == entry) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// One-shot latch used to hold a hook until the test releases it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }

    /// Wait up to `timeout`; returns whether the gate was opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let open = self.open.lock().unwrap();
        let (open, _) = self
            .cv
            .wait_timeout_while(open, timeout, |open| !*open)
            .unwrap();
        *open
    }
}

/// How a [`Recorder`] reacts to its hooks.
#[derive(Clone, Default)]
pub struct Behavior {
    pub threaded: Vec<Hook>,
    pub failing: Vec<Hook>,
    pub panicking: Vec<Hook>,
    pub inactive: bool,
    pub unload_fails: bool,
    pub job: Option<JobHandle>,
    pub delay: Option<Duration>,
    /// Opened as soon as a hook starts, before waiting on `gate`.
    pub entered: Option<Arc<Gate>>,
    pub gate: Option<Arc<Gate>>,
}

impl Behavior {
    pub fn threaded(hooks: &[Hook]) -> Self {
        Self {
            threaded: hooks.to_vec(),
            ..Default::default()
        }
    }

    pub fn failing(hooks: &[Hook]) -> Self {
        Self {
            failing: hooks.to_vec(),
            ..Default::default()
        }
    }

    pub fn inactive() -> Self {
        Self {
            inactive: true,
            ..Default::default()
        }
    }
}

/// Addon that journals every hook it receives.
pub struct Recorder {
    name: String,
    behavior: Behavior,
    journal: Journal,
    active: AtomicBool,
}

impl Recorder {
    fn record(&self, hook: Hook, detail: &str) -> AddonResult {
        if let Some(entered) = &self.behavior.entered {
            entered.open();
        }
        if let Some(gate) = &self.behavior.gate {
            gate.wait();
        }
        if let Some(delay) = self.behavior.delay {
            std::thread::sleep(delay);
        }
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{hook}:{detail}", self.name));
        if self.behavior.panicking.contains(&hook) {
            panic!("{} panicked in {hook}", self.name);
        }
        if self.behavior.failing.contains(&hook) {
            return Err(AddonError::hook(format!("{} failed in {hook}", self.name)));
        }
        Ok(())
    }
}

impl Addon for Recorder {
    fn is_activated(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn threaded_hooks(&self) -> &[Hook] {
        &self.behavior.threaded
    }

    fn core_ready(&self) -> AddonResult {
        self.record(Hook::CoreReady, "")
    }

    fn core_exiting(&self) -> AddonResult {
        self.record(Hook::CoreExiting, "")
    }

    fn download_preparing(&self, file: &DownloadFile) -> AddonResult {
        self.record(Hook::DownloadPreparing, &file.name)
    }

    fn download_finished(&self, file: &DownloadFile) -> AddonResult {
        self.record(Hook::DownloadFinished, &file.name)
    }

    fn download_failed(&self, file: &DownloadFile) -> AddonResult {
        self.record(Hook::DownloadFailed, &file.name)
    }

    fn package_finished(&self, package: &Package) -> AddonResult {
        self.record(Hook::PackageFinished, &package.name)
    }

    fn before_reconnecting(&self, address: &str) -> AddonResult {
        self.record(Hook::BeforeReconnecting, address)
    }

    fn after_reconnecting(&self, address: &str) -> AddonResult {
        self.record(Hook::AfterReconnecting, address)
    }

    fn unload(&self) -> AddonResult {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:unload:", self.name));
        if self.behavior.unload_fails {
            return Err(AddonError::hook("teardown failed"));
        }
        Ok(())
    }

    fn periodic_job(&self) -> Option<JobHandle> {
        self.behavior.job
    }
}

pub fn recorder_class(name: &str, behavior: Behavior, journal: &Journal) -> AddonClass {
    let journal = Arc::clone(journal);
    let class_name = name.to_string();
    AddonClass::new(name, move |_| {
        Ok(Recorder {
            name: class_name.clone(),
            behavior: behavior.clone(),
            journal: Arc::clone(&journal),
            active: AtomicBool::new(!behavior.inactive),
        })
    })
}

/// Scheduler that remembers which jobs were removed.
#[derive(Default)]
pub struct RecordingScheduler {
    pub removed: Mutex<Vec<JobHandle>>,
}

impl Scheduler for RecordingScheduler {
    fn remove_job(&self, job: JobHandle) -> bool {
        self.removed.lock().unwrap().push(job);
        true
    }
}

pub struct Harness {
    pub manager: Arc<AddonManager>,
    pub journal: Journal,
    pub config: Arc<MemoryConfig>,
    pub scheduler: Arc<RecordingScheduler>,
    pub loader: Arc<StaticLoader>,
}

/// Build a manager over recorder addons. `activated` addons are loaded at
/// startup; the others are only known to the loader.
pub fn harness(addons: &[(&str, Behavior, bool)]) -> Harness {
    harness_with(addons, |_, _| {})
}

/// Like [`harness`], with a hook to add extra classes before startup.
pub fn harness_with(
    addons: &[(&str, Behavior, bool)],
    extra: impl FnOnce(&StaticLoader, &MemoryConfig),
) -> Harness {
    init_tracing();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let config = Arc::new(MemoryConfig::new());
    let loader = Arc::new(StaticLoader::new());
    let scheduler = Arc::new(RecordingScheduler::default());

    for (name, behavior, activated) in addons {
        loader.add("addon", recorder_class(name, behavior.clone(), &journal));
        config.set_plugin_option(name, "activated", serde_json::json!(*activated));
    }
    extra(&loader, &config);

    let host = AddonHost::new(config.clone(), scheduler.clone());
    let manager = AddonManager::new(host, loader.clone(), ManagerConfig::default())
        .expect("failed to build addon manager");

    Harness {
        manager,
        journal,
        config,
        scheduler,
        loader,
    }
}

pub fn file(id: u64, name: &str) -> Arc<DownloadFile> {
    Arc::new(DownloadFile {
        id,
        name: name.to_string(),
        package_id: 1,
        status: FileStatus::Finished,
        path: None,
    })
}

pub fn package(id: u64, name: &str) -> Arc<Package> {
    Arc::new(Package {
        id,
        name: name.to_string(),
        folder: name.to_string(),
    })
}
