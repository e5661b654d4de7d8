#![allow(dead_code)]

use plughost_core::{
    BuiltinModuleLoader, DependencyInstaller, EventBus, HostApi, InstallError,
    LifecycleStateStore, ManifestInjector, Plugin, PluginLifecycle, PluginRegistry,
    PluginResult, PluginRuntimeError, PluginStorage, PluginStorageProvisioner, RecordingEventBus,
    RegistryParts,
};
use semver::Version;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

pub const FULL_ENTRY: &str = "test.full";
pub const START_ONLY_ENTRY: &str = "test.start_only";
pub const FAILING_START_ENTRY: &str = "test.failing_start";
pub const PANICKING_STOP_ENTRY: &str = "test.panicking_stop";
pub const FAILING_LOAD_ENTRY: &str = "test.failing_load";
pub const FAILING_UNLOAD_ENTRY: &str = "test.failing_unload";

/// Ordered record of plugin hook invocations, e.g. `load`, `start`.
pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Full-lifecycle plugin recording each hook call.
pub struct RecordingPlugin {
    calls: CallLog,
    storage: Option<PluginStorage>,
    fail_load: bool,
    fail_start: bool,
    panic_on_stop: bool,
    fail_unload: bool,
}

impl RecordingPlugin {
    fn new(calls: CallLog) -> Self {
        Self {
            calls,
            storage: None,
            fail_load: false,
            fail_start: false,
            panic_on_stop: false,
            fail_unload: false,
        }
    }

    fn record(&self, hook: &str) {
        self.calls.borrow_mut().push(hook.to_string());
    }
}

impl Plugin for RecordingPlugin {
    fn start(&mut self) -> PluginResult<()> {
        self.record("start");
        if self.fail_start {
            return Err(PluginRuntimeError::new("refusing to start"));
        }
        Ok(())
    }

    fn lifecycle(&mut self) -> Option<&mut dyn PluginLifecycle> {
        Some(self)
    }
}

impl PluginLifecycle for RecordingPlugin {
    fn load(&mut self, _host: &HostApi, storage: PluginStorage) -> PluginResult<()> {
        self.record("load");
        if self.fail_load {
            return Err(PluginRuntimeError::new("refusing to load"));
        }
        self.storage = Some(storage);
        Ok(())
    }

    fn stop(&mut self) -> PluginResult<()> {
        self.record("stop");
        if self.panic_on_stop {
            panic!("stop hook exploded");
        }
        Ok(())
    }

    fn unload(&mut self) -> PluginResult<()> {
        self.record("unload");
        if self.fail_unload {
            return Err(PluginRuntimeError::new("refusing to unload"));
        }
        self.storage = None;
        Ok(())
    }
}

/// Plugin exposing only `start`.
pub struct StartOnlyPlugin {
    calls: CallLog,
}

impl Plugin for StartOnlyPlugin {
    fn start(&mut self) -> PluginResult<()> {
        self.calls.borrow_mut().push("start".to_string());
        Ok(())
    }
}

/// Installer counting how often it ran; fails while `failures` is non-zero.
pub struct CountingInstaller {
    runs: Rc<Cell<usize>>,
    failures: Rc<Cell<usize>>,
}

impl DependencyInstaller for CountingInstaller {
    fn install(&mut self, _manifest_path: &Path) -> Result<(), InstallError> {
        self.runs.set(self.runs.get() + 1);
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(InstallError::Failed("registry offline".to_string()));
        }
        Ok(())
    }
}

/// Registry over a temp host directory with recording collaborators.
pub struct Harness {
    pub dir: TempDir,
    pub events: Rc<RecordingEventBus>,
    pub calls: CallLog,
    pub installs: Rc<Cell<usize>>,
    /// Number of upcoming installs that fail.
    pub install_failures: Rc<Cell<usize>>,
    pub registry: PluginRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_api_version(Version::new(1, 0, 0))
    }

    pub fn with_api_version(api_version: Version) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let events = Rc::new(RecordingEventBus::new());
        let calls: CallLog = Rc::new(RefCell::new(Vec::new()));
        let installs = Rc::new(Cell::new(0));
        let install_failures = Rc::new(Cell::new(0));
        let registry = build_registry(
            dir.path(),
            events.clone(),
            calls.clone(),
            (installs.clone(), install_failures.clone()),
            api_version,
        );
        Self {
            dir,
            events,
            calls,
            installs,
            install_failures,
            registry,
        }
    }

    /// A second registry over the same directories, sharing the collaborators.
    pub fn reopen(&self) -> PluginRegistry {
        build_registry(
            self.dir.path(),
            self.events.clone(),
            self.calls.clone(),
            (self.installs.clone(), self.install_failures.clone()),
            self.registry.host_api_version().clone(),
        )
    }

    /// Writes `<name>.plugin.json` with the given manifest and entry.
    pub fn write_plugin(&self, name: &str, meta_inf: Value, entry: &str) {
        self.write_descriptor(name, json!({ "meta_inf": meta_inf, "entry": entry }));
    }

    pub fn write_descriptor(&self, name: &str, descriptor: Value) {
        let path = self
            .registry
            .plugins_dir()
            .join(format!("{name}.plugin.json"));
        let body = serde_json::to_string_pretty(&descriptor).expect("serialize descriptor");
        std::fs::write(path, body).expect("write descriptor");
    }

    pub fn host_manifest_path(&self) -> std::path::PathBuf {
        self.dir.path().join("host-manifest.json")
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.names()
    }
}

pub fn build_registry(
    root: &Path,
    events: Rc<RecordingEventBus>,
    calls: CallLog,
    (installs, install_failures): (Rc<Cell<usize>>, Rc<Cell<usize>>),
    api_version: Version,
) -> PluginRegistry {
    let mut loader = BuiltinModuleLoader::with_first_party_baseline();

    let full_calls = calls.clone();
    loader
        .register(FULL_ENTRY, move || -> Box<dyn Plugin> {
            Box::new(RecordingPlugin::new(full_calls.clone()))
        })
        .expect("register full entry");

    let start_only_calls = calls.clone();
    loader
        .register(START_ONLY_ENTRY, move || -> Box<dyn Plugin> {
            Box::new(StartOnlyPlugin {
                calls: start_only_calls.clone(),
            })
        })
        .expect("register start-only entry");

    let failing_calls = calls.clone();
    loader
        .register(FAILING_START_ENTRY, move || -> Box<dyn Plugin> {
            let mut plugin = RecordingPlugin::new(failing_calls.clone());
            plugin.fail_start = true;
            Box::new(plugin)
        })
        .expect("register failing entry");

    let failing_load_calls = calls.clone();
    loader
        .register(FAILING_LOAD_ENTRY, move || -> Box<dyn Plugin> {
            let mut plugin = RecordingPlugin::new(failing_load_calls.clone());
            plugin.fail_load = true;
            Box::new(plugin)
        })
        .expect("register failing load entry");

    let failing_unload_calls = calls.clone();
    loader
        .register(FAILING_UNLOAD_ENTRY, move || -> Box<dyn Plugin> {
            let mut plugin = RecordingPlugin::new(failing_unload_calls.clone());
            plugin.fail_unload = true;
            Box::new(plugin)
        })
        .expect("register failing unload entry");

    loader
        .register(PANICKING_STOP_ENTRY, move || -> Box<dyn Plugin> {
            let mut plugin = RecordingPlugin::new(calls.clone());
            plugin.panic_on_stop = true;
            Box::new(plugin)
        })
        .expect("register panicking entry");

    let bus: Rc<dyn EventBus> = events;
    PluginRegistry::new(RegistryParts {
        plugins_dir: root.join("plugins"),
        host: HostApi::new(bus, api_version),
        loader: Box::new(loader),
        injector: ManifestInjector::new(
            root.join("host-manifest.json"),
            Box::new(CountingInstaller {
                runs: installs,
                failures: install_failures,
            }),
        ),
        storage: PluginStorageProvisioner::new(root.join("storage/plugins")),
        states: LifecycleStateStore::open(root.join("storage/plugin_loader.sqlite3"))
            .expect("open lifecycle store"),
    })
    .expect("create registry")
}
