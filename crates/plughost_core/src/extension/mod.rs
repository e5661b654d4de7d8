//! Plugin runtime.
//!
//! Identifiers and manifests, the module loading seam, host capabilities,
//! dependency injection into the host manifest, and the registry driving the
//! plugin lifecycle.

pub mod builtin;
pub mod host;
pub mod injector;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod plugin_id;
pub mod registry;
pub mod version_gate;
