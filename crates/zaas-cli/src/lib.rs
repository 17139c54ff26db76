// zaas-cli: Clap commands, logging, operator UI
// Depends on zaas-core, zaas-runtime

pub mod commands;
pub mod logging;
pub mod ui;

pub use commands::run;
