//! # zaas: ZaaS appliance bootstrap
//!
//! Facade crate that re-exports the zaas workspace crates so consumers
//! can depend on a single `zaas` library.
//!
//! ## Crate breakdown
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | zaas-core | Identity, manager config schema, provisioning state, telemetry types, settings |
//! | [`runtime`] | zaas-runtime | Stores, pairing, SSO and registration client, telemetry, bootstrap state machine |
//! | [`cli`] | zaas-cli | Command tree, logging, operator UI |

pub use zaas_cli as cli;
pub use zaas_core as core;
pub use zaas_runtime as runtime;
