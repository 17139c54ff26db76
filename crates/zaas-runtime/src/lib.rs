// zaas-runtime: filesystem, terminal, HTTP and the bootstrap state machine
// Depends on zaas-core

pub mod error;
pub mod http;
pub mod orchestrator;
pub mod pairing;
pub mod privilege;
pub mod sso;
pub mod store;
pub mod telemetry;
pub mod vm_probe;

pub use error::BootstrapError;
pub use orchestrator::{Bootstrap, Outcome};
