//! First-party baseline plugin.
//!
//! `builtin.echo` exercises the full lifecycle contract: it keeps the host
//! capability object and its storage handle from `load`, counts starts in
//! its private namespace and echoes lifecycle transitions onto the event bus.

use crate::extension::host::HostApi;
use crate::extension::module::{Plugin, PluginLifecycle, PluginResult, PluginRuntimeError};
use crate::store::plugin_storage::PluginStorage;
use crate::store::KeyValueStore;
use log::info;
use serde_json::json;

/// Entry name of [`EchoPlugin`].
pub const ECHO_ENTRY: &str = "builtin.echo";
/// Storage key holding the number of starts since the namespace was last cleared.
pub const ECHO_START_COUNT_KEY: &str = "start_count";

#[derive(Default)]
pub struct EchoPlugin {
    host: Option<HostApi>,
    storage: Option<PluginStorage>,
}

impl EchoPlugin {
    fn bump_start_count(&self) -> PluginResult<u64> {
        let Some(storage) = &self.storage else {
            return Ok(1);
        };
        let previous = storage
            .get(ECHO_START_COUNT_KEY)
            .map_err(|err| PluginRuntimeError::new(err.to_string()))?
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        let next = previous + 1;
        storage
            .set(ECHO_START_COUNT_KEY, &next.to_string())
            .map_err(|err| PluginRuntimeError::new(err.to_string()))?;
        Ok(next)
    }

    fn echo(&self, event: &str, count: Option<u64>) {
        if let Some(host) = &self.host {
            match count {
                Some(count) => host.emit(event, &[json!(count)]),
                None => host.emit(event, &[]),
            }
        }
    }
}

impl Plugin for EchoPlugin {
    fn start(&mut self) -> PluginResult<()> {
        let starts = self.bump_start_count()?;
        info!("event=echo_start module=builtin status=ok starts={}", starts);
        self.echo("echo.started", Some(starts));
        Ok(())
    }

    fn lifecycle(&mut self) -> Option<&mut dyn PluginLifecycle> {
        Some(self)
    }
}

impl PluginLifecycle for EchoPlugin {
    fn load(&mut self, host: &HostApi, storage: PluginStorage) -> PluginResult<()> {
        self.host = Some(host.clone());
        self.storage = Some(storage);
        Ok(())
    }

    fn stop(&mut self) -> PluginResult<()> {
        self.echo("echo.stopped", None);
        Ok(())
    }

    fn unload(&mut self) -> PluginResult<()> {
        self.host = None;
        self.storage = None;
        Ok(())
    }
}
