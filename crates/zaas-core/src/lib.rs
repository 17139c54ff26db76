// zaas-core: Pure types, identity, manager config schema, settings
// No internal zaas dependencies: this is the foundation crate.

pub mod config;
pub mod identity;
pub mod manager;
pub mod state;
pub mod telemetry;
pub mod time;
