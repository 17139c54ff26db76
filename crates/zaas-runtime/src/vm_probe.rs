use std::process::Command;

use tracing::debug;
use zaas_core::telemetry::VmStatus;

const DETECT_VIRT: &str = "systemd-detect-virt";

/// Best-effort virtualization detection. Never fails.
pub trait VmProbe {
    fn detect(&self) -> VmStatus;
}

/// Probe backed by `systemd-detect-virt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdDetectVirt;

impl VmProbe for SystemdDetectVirt {
    fn detect(&self) -> VmStatus {
        let Ok(tool) = which::which(DETECT_VIRT) else {
            debug!("{} not found, assuming bare metal", DETECT_VIRT);
            return VmStatus::bare_metal();
        };

        match Command::new(tool).output() {
            Ok(output) => interpret(
                output.status.success(),
                &String::from_utf8_lossy(&output.stdout),
            ),
            Err(e) => {
                debug!(error = %e, "{} failed to run", DETECT_VIRT);
                VmStatus::bare_metal()
            }
        }
    }
}

/// Map the tool's exit status and stdout to a [`VmStatus`].
///
/// `systemd-detect-virt` exits non-zero and prints `none` on bare metal.
fn interpret(success: bool, stdout: &str) -> VmStatus {
    if !success {
        return VmStatus::bare_metal();
    }
    match stdout.trim() {
        "" => VmStatus::virtualized("unknown"),
        label => VmStatus::virtualized(label),
    }
}
