//! Host capability object handed to plugins, and the event bus seam.

use log::info;
use semver::Version;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Emitted after a plugin entered the loaded set.
pub const EVENT_PLUGIN_LOADED: &str = "pluginLoaded";
/// Emitted after a plugin left the loaded set.
pub const EVENT_PLUGIN_UNLOADED: &str = "pluginUnloaded";
/// Emitted after a plugin started running.
pub const EVENT_PLUGIN_STARTED: &str = "pluginStarted";
/// Emitted after a running plugin stopped.
pub const EVENT_PLUGIN_STOPPED: &str = "pluginStopped";

/// Host event bus capability.
pub trait EventBus {
    fn emit(&self, event: &str, args: &[Value]);
}

/// Event bus that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventBus;

impl EventBus for LogEventBus {
    fn emit(&self, event: &str, args: &[Value]) {
        info!(
            "event=host_event module=host name={} args={}",
            event,
            Value::Array(args.to_vec())
        );
    }
}

/// One event captured by [`RecordingEventBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub args: Vec<Value>,
}

/// In-memory event bus keeping every emitted event in order.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: RefCell<Vec<EmittedEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|event| event.name.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventBus for RecordingEventBus {
    fn emit(&self, event: &str, args: &[Value]) {
        self.events.borrow_mut().push(EmittedEvent {
            name: event.to_string(),
            args: args.to_vec(),
        });
    }
}

/// Capability object passed to `PluginLifecycle::load`.
///
/// Cloning is cheap; plugins may keep a clone for later event emission.
#[derive(Clone)]
pub struct HostApi {
    events: Rc<dyn EventBus>,
    api_version: Version,
}

impl HostApi {
    pub fn new(events: Rc<dyn EventBus>, api_version: Version) -> Self {
        Self {
            events,
            api_version,
        }
    }

    /// Forwards `event` to the host event bus.
    pub fn emit(&self, event: &str, args: &[Value]) {
        self.events.emit(event, args);
    }

    /// Running host API version.
    pub fn api_version(&self) -> &Version {
        &self.api_version
    }
}

impl Debug for HostApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("api_version", &self.api_version.to_string())
            .finish_non_exhaustive()
    }
}
