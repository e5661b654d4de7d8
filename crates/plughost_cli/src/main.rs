//! `plughost` command-line front-end.
//!
//! # Responsibility
//! - Assemble a plugin registry from config file, flags and environment.
//! - Inspect plugins and their persisted lifecycle state.
//! - Boot plugins into their last-known state, reset plugin storage.

use clap::{Parser, Subcommand};
use log::{info, warn};
use plughost_core::{
    core_version, default_log_level, init_logging, BuiltinModuleLoader, ConfigError, EventBus,
    HostConfig, LifecycleState, LogEventBus, PluginRegistry,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(name = "plughost", version, about = "Host-side plugin lifecycle manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Host directory containing plugins/, storage/ and the host manifest.
    #[arg(long, global = true, env = "PLUGHOST_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Host API version plugins are checked against.
    #[arg(long, global = true, env = "PLUGHOST_API_VERSION")]
    api_version: Option<String>,

    /// JSON config file; flags override its values.
    #[arg(long, global = true, env = "PLUGHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "PLUGHOST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Downgrade informational lifecycle messages to debug.
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List discovered plugins with their persisted state.
    List,
    /// Print the normalized manifest of a plugin.
    Info { plugin: String },
    /// Print the persisted and initial lifecycle state of a plugin.
    State { plugin: String },
    /// Load and start every plugin according to its persisted state.
    Boot,
    /// Clear the private storage of a plugin.
    ResetStorage { plugin: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("plughost: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, Box<dyn Error>> {
    let config = resolve_config(&cli)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    init_logging(&level, &config.log_dir(), true)?;
    info!(
        "event=cli_start module=cli status=ok command={:?} core_version={} base_dir={} api_version={}",
        cli.command,
        core_version(),
        config.base_dir.display(),
        config.api_version
    );

    let events: Rc<dyn EventBus> = Rc::new(LogEventBus);
    let loader = Box::new(BuiltinModuleLoader::with_first_party_baseline());
    let mut registry = PluginRegistry::from_config(&config, events, loader)?;

    match cli.command {
        Command::List => list(&mut registry),
        Command::Info { plugin } => {
            let manifest = registry.manifest_info(&plugin)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(true)
        }
        Command::State { plugin } => {
            let persisted = registry
                .persisted_state(&plugin)?
                .map(|state| state.to_string())
                .unwrap_or_else(|| "-".to_string());
            let initial = registry.initial_state(&plugin)?;
            println!("persisted={persisted} initial={initial}");
            Ok(true)
        }
        Command::Boot => boot(&mut registry, cli.quiet),
        Command::ResetStorage { plugin } => {
            let reset = registry.reset_plugin_storage(&plugin, cli.quiet);
            println!("{plugin}: {}", if reset { "storage cleared" } else { "reset failed" });
            Ok(reset)
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<HostConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }
    if let Some(api_version) = &cli.api_version {
        config.api_version = api_version.clone();
    }
    config.base_dir =
        std::path::absolute(&config.base_dir).map_err(|source| ConfigError::Io {
            path: config.base_dir.clone(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

fn list(registry: &mut PluginRegistry) -> Result<bool, Box<dyn Error>> {
    println!(
        "plughost {} (host api {})",
        core_version(),
        registry.host_api_version()
    );
    for plugin in registry.discover_plugins()? {
        let persisted = registry
            .persisted_state(plugin.as_str())?
            .map(|state| state.to_string())
            .unwrap_or_else(|| "-".to_string());
        match registry.manifest_info(plugin.as_str()) {
            Ok(manifest) => println!("{plugin}\t{}\tstate={persisted}", manifest.label()),
            Err(err) => println!("{plugin}\tinvalid: {err}\tstate={persisted}"),
        }
    }
    Ok(true)
}

fn boot(registry: &mut PluginRegistry, quiet: bool) -> Result<bool, Box<dyn Error>> {
    let mut loaded = 0;
    let mut started = 0;
    let mut failed = 0;

    for plugin in registry.discover_plugins()? {
        let initial = registry.initial_state(plugin.as_str())?;
        if initial == LifecycleState::Unloaded {
            continue;
        }
        if !registry.load(plugin.as_str(), quiet) {
            failed += 1;
            continue;
        }
        loaded += 1;
        if initial == LifecycleState::Running {
            if registry.start(plugin.as_str(), quiet) {
                started += 1;
            } else {
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!(
            "event=cli_boot module=cli status=partial loaded={} started={} failed={}",
            loaded, started, failed
        );
    }
    println!("loaded={loaded} started={started} failed={failed}");
    Ok(failed == 0)
}
