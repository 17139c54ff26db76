use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::InstanceIdentity;

/// Result of the virtualization probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub in_vm: bool,
    /// Hypervisor label reported by the probe, empty when not virtualized.
    pub hypervisor: String,
}

impl VmStatus {
    pub fn bare_metal() -> Self {
        Self::default()
    }

    pub fn virtualized(hypervisor: &str) -> Self {
        Self {
            in_vm: true,
            hypervisor: hypervisor.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_release: String,
    pub os_version: String,
    pub machine: String,
    pub hostname: String,
    /// Boot time, seconds since the Unix epoch.
    pub boot_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub logical_count: u32,
    pub physical_cores: u32,
    pub freq_min_mhz: f64,
    pub freq_max_mhz: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Host snapshot sent to the fleet manager with the registration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTelemetry {
    pub instance_id: InstanceIdentity,
    /// Hostname assigned by the manager during pairing.
    pub hostname: String,
    pub collected_at: String,
    pub system: SystemInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub swap: SwapInfo,
    /// Keyed by mount point.
    pub disks: BTreeMap<String, DiskUsage>,
    pub io: IoCounters,
    pub vm: VmStatus,
}

/// Percentage rounded to one decimal, 0.0 when `total` is zero.
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 1000.0).round() / 10.0
}
