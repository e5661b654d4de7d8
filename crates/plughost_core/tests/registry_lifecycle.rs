mod common;

use common::{
    Harness, FAILING_LOAD_ENTRY, FAILING_START_ENTRY, FAILING_UNLOAD_ENTRY, FULL_ENTRY,
    PANICKING_STOP_ENTRY, START_ONLY_ENTRY,
};
use plughost_core::{
    Incompatibility, LifecycleOutcome, LifecycleState, PluginError, PluginId, SkipReason,
};
use semver::Version;
use serde_json::json;

#[test]
fn round_trip_emits_events_and_persists_unloaded() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({ "name": "Full", "version": "1.2.0" }), FULL_ENTRY);

    assert!(harness.registry.load("full", false));
    assert_eq!(
        harness.registry.persisted_state("full").expect("state"),
        Some(LifecycleState::Loaded)
    );
    assert!(harness.registry.start("full", false));
    assert_eq!(
        harness.registry.persisted_state("full").expect("state"),
        Some(LifecycleState::Running)
    );
    assert!(harness.registry.stop("full", false));
    assert!(harness.registry.unload("full", false));

    assert_eq!(harness.calls(), vec!["load", "start", "stop", "unload"]);
    assert_eq!(
        harness.event_names(),
        vec!["pluginLoaded", "pluginStarted", "pluginStopped", "pluginUnloaded"]
    );
    let events = harness.events.events();
    assert!(events
        .iter()
        .all(|event| event.args == vec![json!("full.plugin.json")]));
    assert_eq!(
        harness.registry.persisted_state("full").expect("state"),
        Some(LifecycleState::Unloaded)
    );
    assert!(!harness.registry.is_loaded("full"));
    assert!(harness.registry.loaded_plugins().is_empty());
}

#[test]
fn suffixed_and_bare_ids_name_the_same_plugin() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({ "name": "Full" }), FULL_ENTRY);

    assert!(harness.registry.load("full", true));
    assert!(harness.registry.is_loaded("full.plugin.json"));
    assert!(!harness.registry.load("full.plugin.json", true));
    assert!(harness.registry.start("full.plugin.json", true));
    assert!(harness.registry.is_running("full"));
    assert!(harness.registry.stop("full", true));
    assert!(harness.registry.unload("full.plugin.json", true));

    let manifest = harness
        .registry
        .manifest_info("full.plugin.json")
        .expect("manifest");
    assert_eq!(manifest.name, "Full");
    assert_eq!(
        harness.registry.persisted_state("full.plugin.json").expect("state"),
        harness.registry.persisted_state("full").expect("state")
    );
}

#[test]
fn start_requires_load_and_unload_is_refused_while_running() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({}), FULL_ENTRY);

    assert!(!harness.registry.start("full", true));
    assert!(!harness.registry.is_running("full"));

    assert!(harness.registry.load("full", true));
    assert!(harness.registry.start("full", true));
    assert_eq!(
        harness.registry.try_unload("full", true).expect("unload"),
        LifecycleOutcome::Skipped(SkipReason::StillRunning)
    );
    assert!(harness.registry.is_loaded("full"));
    assert!(harness.registry.is_running("full"));
    assert_eq!(harness.calls(), vec!["load", "start"]);
}

#[test]
fn repeated_operations_are_idempotent() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({}), FULL_ENTRY);

    assert!(harness.registry.load("full", true));
    assert!(!harness.registry.load("full", true));
    assert!(harness.registry.start("full", true));
    assert!(!harness.registry.start("full", true));
    assert!(harness.registry.stop("full", true));
    assert!(!harness.registry.stop("full", true));
    assert!(harness.registry.unload("full", true));
    assert!(!harness.registry.unload("full", true));

    assert_eq!(harness.calls(), vec!["load", "start", "stop", "unload"]);
    assert_eq!(harness.event_names().len(), 4);
}

#[test]
fn incompatible_api_range_is_declined_before_plugin_code_runs() {
    let mut harness = Harness::with_api_version(Version::new(1, 0, 0));
    harness.write_plugin(
        "future",
        json!({
            "name": "Future",
            "api_version_required": ">=2.0.0",
            "dependencies": { "left-pad": "^1.3.0" }
        }),
        FULL_ENTRY,
    );

    let outcome = harness.registry.try_load("future", true).expect("load");
    assert_eq!(
        outcome,
        LifecycleOutcome::Declined(Incompatibility {
            required: ">=2.0.0".to_string(),
            host: "1.0.0".to_string(),
        })
    );
    assert!(!harness.registry.load("future", true));
    assert!(!harness.registry.is_loaded("future"));
    assert!(harness.calls().is_empty());
    assert!(harness.event_names().is_empty());
    assert_eq!(harness.installs.get(), 0);
    assert_eq!(harness.registry.persisted_state("future").expect("state"), None);
}

#[test]
fn camel_case_api_range_key_is_honored() {
    let mut harness = Harness::with_api_version(Version::new(2, 3, 1));
    harness.write_plugin("modern", json!({ "apiVersionRequired": "^2.1" }), FULL_ENTRY);

    assert!(harness.registry.load("modern", true));
}

#[test]
fn invalid_plugin_is_never_loaded() {
    let mut harness = Harness::new();
    harness.write_descriptor("idle", json!({ "meta_inf": { "name": "Idle" } }));
    harness.write_descriptor("anonymous", json!({ "entry": FULL_ENTRY }));
    std::fs::write(
        harness.registry.plugins_dir().join("garbled.plugin.json"),
        "{ not json",
    )
    .expect("write garbled");

    for plugin in ["idle", "anonymous", "garbled", "ghost"] {
        assert!(!harness.registry.load(plugin, true), "{plugin} must not load");
        assert!(!harness.registry.is_loaded(plugin));
    }
    assert!(matches!(
        harness.registry.try_load("ghost", true),
        Err(PluginError::PluginNotFound(_))
    ));
    assert!(harness.event_names().is_empty());
    assert!(harness.calls().is_empty());
}

#[test]
fn failing_start_leaves_plugin_loaded() {
    let mut harness = Harness::new();
    harness.write_plugin("sulky", json!({}), FAILING_START_ENTRY);

    assert!(harness.registry.load("sulky", false));
    let outcome = harness.registry.try_start("sulky", false).expect("start");
    match outcome {
        LifecycleOutcome::Failed(err) => assert_eq!(err.message(), "refusing to start"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(harness.registry.is_loaded("sulky"));
    assert!(!harness.registry.is_running("sulky"));
    assert_eq!(
        harness.registry.persisted_state("sulky").expect("state"),
        Some(LifecycleState::Loaded)
    );
    assert_eq!(harness.event_names(), vec!["pluginLoaded"]);
}

#[test]
fn panicking_hook_is_contained() {
    let mut harness = Harness::new();
    harness.write_plugin("volatile", json!({}), PANICKING_STOP_ENTRY);

    assert!(harness.registry.load("volatile", true));
    assert!(harness.registry.start("volatile", true));
    let outcome = harness.registry.try_stop("volatile", true).expect("stop");
    match outcome {
        LifecycleOutcome::Failed(err) => assert!(err.message().contains("stop hook exploded")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(harness.registry.is_running("volatile"));
}

#[test]
fn start_only_plugins_skip_optional_hooks() {
    let mut harness = Harness::new();
    harness.write_plugin("minimal", json!({}), START_ONLY_ENTRY);

    assert!(harness.registry.load("minimal", true));
    assert!(harness.registry.start("minimal", true));
    assert!(harness.registry.stop("minimal", true));
    assert!(harness.registry.unload("minimal", true));
    assert_eq!(harness.calls(), vec!["start"]);
}

#[test]
fn discovery_and_queries_reflect_registry_state() {
    let mut harness = Harness::new();
    harness.write_plugin("b", json!({}), FULL_ENTRY);
    harness.write_plugin("a", json!({}), START_ONLY_ENTRY);

    let discovered = harness.registry.discover_plugins().expect("discover");
    assert_eq!(
        discovered,
        vec![
            PluginId::parse("a").expect("id"),
            PluginId::parse("b").expect("id")
        ]
    );

    assert!(harness.registry.load("a", true));
    assert!(harness.registry.load("b", true));
    assert!(harness.registry.start("b", true));
    assert_eq!(harness.registry.loaded_plugins(), discovered);
    assert_eq!(
        harness.registry.started_plugins(),
        vec![PluginId::parse("b").expect("id")]
    );

    assert!(harness.registry.stop("b", true));
    assert!(harness.registry.started_plugins().is_empty());
}

#[test]
fn persisted_state_survives_a_new_registry() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({}), FULL_ENTRY);
    harness.write_plugin("quiet", json!({}), FULL_ENTRY);

    assert!(harness.registry.load("full", true));
    assert!(harness.registry.start("full", true));
    assert!(harness.registry.load("quiet", true));

    let reopened = harness.reopen();
    assert_eq!(
        reopened.initial_state("full").expect("state"),
        LifecycleState::Running
    );
    assert_eq!(
        reopened.initial_state("quiet").expect("state"),
        LifecycleState::Loaded
    );
    assert_eq!(
        reopened.initial_state("never-seen").expect("state"),
        LifecycleState::Running
    );
    assert!(reopened.loaded_plugins().is_empty());
}

#[test]
fn unload_forgets_cached_module_and_reload_reads_disk() {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({ "version": "1.0.0" }), FULL_ENTRY);

    assert!(harness.registry.load("full", true));
    harness.write_plugin("full", json!({ "version": "2.0.0" }), FULL_ENTRY);
    assert_eq!(
        harness.registry.manifest_info("full").expect("manifest").version,
        "1.0.0"
    );

    assert!(harness.registry.unload("full", true));
    assert!(harness.registry.load("full", true));
    assert_eq!(
        harness.registry.manifest_info("full").expect("manifest").version,
        "2.0.0"
    );
}

#[test]
fn failing_load_hook_leaves_no_trace() {
    let mut harness = Harness::new();
    harness.write_plugin("grumpy", json!({}), FAILING_LOAD_ENTRY);

    match harness.registry.try_load("grumpy", true).expect("load") {
        LifecycleOutcome::Failed(err) => assert_eq!(err.message(), "refusing to load"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!harness.registry.load("grumpy", true));
    assert!(!harness.registry.is_loaded("grumpy"));
    assert!(harness.registry.loaded_plugins().is_empty());
    assert!(harness.event_names().is_empty());
    assert_eq!(harness.registry.persisted_state("grumpy").expect("state"), None);
}

#[test]
fn failing_unload_hook_keeps_plugin_loaded() {
    let mut harness = Harness::new();
    harness.write_plugin("clingy", json!({}), FAILING_UNLOAD_ENTRY);
    assert!(harness.registry.load("clingy", true));

    match harness.registry.try_unload("clingy", true).expect("unload") {
        LifecycleOutcome::Failed(err) => assert_eq!(err.message(), "refusing to unload"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!harness.registry.unload("clingy", true));
    assert!(harness.registry.is_loaded("clingy"));
    assert_eq!(harness.event_names(), vec!["pluginLoaded"]);
    assert_eq!(
        harness.registry.persisted_state("clingy").expect("state"),
        Some(LifecycleState::Loaded)
    );
}

fn run_sequence(quiet: bool) -> Vec<bool> {
    let mut harness = Harness::new();
    harness.write_plugin("full", json!({}), FULL_ENTRY);
    harness.write_plugin("sulky", json!({}), FAILING_START_ENTRY);
    harness.write_plugin("future", json!({ "api_version_required": "^9" }), FULL_ENTRY);

    let registry = &mut harness.registry;
    vec![
        registry.start("full", quiet),
        registry.load("full", quiet),
        registry.load("full", quiet),
        registry.start("full", quiet),
        registry.unload("full", quiet),
        registry.load("sulky", quiet),
        registry.start("sulky", quiet),
        registry.load("future", quiet),
        registry.load("ghost", quiet),
        registry.reset_plugin_storage("full", quiet),
        registry.stop("full", quiet),
        registry.unload("full", quiet),
    ]
}

#[test]
fn quiet_flag_does_not_change_results() {
    let loud = run_sequence(false);
    assert_eq!(loud, run_sequence(true));
    assert_eq!(
        loud,
        vec![false, true, false, true, false, true, false, false, false, true, true, true]
    );
}
