//! Host telemetry snapshot for the registration call.
//!
//! Every probe is best-effort: a missing or unreadable source yields zeroed
//! fields, never an error.

use std::collections::{BTreeMap, HashSet};
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use zaas_core::identity::InstanceIdentity;
use zaas_core::telemetry::{
    CpuInfo, DiskUsage, HostTelemetry, IoCounters, MemoryInfo, SwapInfo, SystemInfo, VmStatus,
    percent,
};
use zaas_core::time::utc_now;

/// Linux `/proc/diskstats` reports sectors of 512 bytes regardless of device.
const SECTOR_SIZE: u64 = 512;

pub trait TelemetrySource {
    fn collect(&self, identity: InstanceIdentity, hostname: &str, vm: VmStatus) -> HostTelemetry;
}

/// Reads `/proc` and `/sys`, with roots overridable for tests.
#[derive(Debug, Clone)]
pub struct ProcTelemetry {
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for ProcTelemetry {
    fn default() -> Self {
        Self::with_roots(Path::new("/proc"), Path::new("/sys"))
    }
}

impl ProcTelemetry {
    pub fn with_roots(proc_root: &Path, sys_root: &Path) -> Self {
        Self {
            proc_root: proc_root.to_path_buf(),
            sys_root: sys_root.to_path_buf(),
        }
    }

    fn read_proc(&self, name: &str) -> String {
        read_or_empty(&self.proc_root.join(name))
    }

    fn system(&self) -> SystemInfo {
        let mut info = uname().unwrap_or_default();
        info.boot_time = parse_boot_time(&self.read_proc("stat"));
        info
    }

    fn cpu(&self) -> CpuInfo {
        let (logical_count, physical_cores) = parse_cpuinfo(&self.read_proc("cpuinfo"));
        let freq_dir = self.sys_root.join("devices/system/cpu/cpu0/cpufreq");
        CpuInfo {
            logical_count,
            physical_cores,
            freq_min_mhz: read_khz_as_mhz(&freq_dir.join("cpuinfo_min_freq")),
            freq_max_mhz: read_khz_as_mhz(&freq_dir.join("cpuinfo_max_freq")),
        }
    }

    fn disks(&self) -> BTreeMap<String, DiskUsage> {
        parse_block_mounts(&self.read_proc("mounts"))
            .into_iter()
            .filter_map(|mount| disk_usage(&mount).map(|usage| (mount, usage)))
            .collect()
    }

    fn io(&self) -> IoCounters {
        let block = self.sys_root.join("block");
        parse_diskstats(&self.read_proc("diskstats"), |name| {
            block.join(name).exists()
        })
    }
}

impl TelemetrySource for ProcTelemetry {
    fn collect(&self, identity: InstanceIdentity, hostname: &str, vm: VmStatus) -> HostTelemetry {
        let (memory, swap) = parse_meminfo(&self.read_proc("meminfo"));
        HostTelemetry {
            instance_id: identity,
            hostname: hostname.to_string(),
            collected_at: utc_now(),
            system: self.system(),
            cpu: self.cpu(),
            memory,
            swap,
            disks: self.disks(),
            io: self.io(),
            vm,
        }
    }
}

fn read_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        debug!(path = %path.display(), error = %e, "telemetry source unavailable");
        String::new()
    })
}

fn read_khz_as_mhz(path: &Path) -> f64 {
    read_or_empty(path)
        .trim()
        .parse::<f64>()
        .map(|khz| khz / 1000.0)
        .unwrap_or(0.0)
}

/// Memory and swap from `/proc/meminfo` (values there are in KiB).
fn parse_meminfo(text: &str) -> (MemoryInfo, SwapInfo) {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(kib) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
            fields.insert(key.trim(), kib * 1024);
        }
    }
    let get = |key: &str| fields.get(key).copied().unwrap_or(0);

    let total = get("MemTotal");
    let free = get("MemFree");
    let available = fields.get("MemAvailable").copied().unwrap_or(free);
    let memory = MemoryInfo {
        total,
        available,
        used: total.saturating_sub(available),
        free,
    };

    let swap_total = get("SwapTotal");
    let swap_free = get("SwapFree");
    let swap_used = swap_total.saturating_sub(swap_free);
    let swap = SwapInfo {
        total: swap_total,
        used: swap_used,
        free: swap_free,
        percent: percent(swap_used, swap_total),
    };

    (memory, swap)
}

fn parse_boot_time(stat: &str) -> u64 {
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Logical processors and distinct physical cores from `/proc/cpuinfo`.
fn parse_cpuinfo(text: &str) -> (u32, u32) {
    let mut logical = 0u32;
    let mut cores = HashSet::new();
    let mut physical_id = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => {
                logical += 1;
                physical_id = None;
            }
            "physical id" => physical_id = Some(value.trim().to_string()),
            "core id" => {
                let socket = physical_id.clone().unwrap_or_default();
                cores.insert((socket, value.trim().to_string()));
            }
            _ => {}
        }
    }

    let physical = if cores.is_empty() {
        logical
    } else {
        cores.len() as u32
    };
    (logical, physical)
}

/// Mount points backed by block devices, in `/proc/mounts` order, deduplicated.
fn parse_block_mounts(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount = parts.next()?;
            device
                .starts_with("/dev/")
                .then(|| unescape_mount(mount))
        })
        .filter(|mount| seen.insert(mount.clone()))
        .collect()
}

/// `/proc/mounts` escapes space, tab, newline and backslash as octal.
fn unescape_mount(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Aggregate I/O counters over the devices accepted by `is_disk`.
fn parse_diskstats<F>(text: &str, is_disk: F) -> IoCounters
where
    F: Fn(&str) -> bool,
{
    let mut io = IoCounters::default();
    for line in text.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 10 || !is_disk(cols[2]) {
            continue;
        }
        let num = |i: usize| cols[i].parse::<u64>().unwrap_or(0);
        io.read_count += num(3);
        io.read_bytes += num(5) * SECTOR_SIZE;
        io.write_count += num(7);
        io.write_bytes += num(9) * SECTOR_SIZE;
    }
    io
}

fn disk_usage(mount: &str) -> Option<DiskUsage> {
    let path = CString::new(mount).ok()?;
    // SAFETY: zeroed statvfs is a valid out-parameter; path is NUL-terminated.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut st) } != 0 {
        return None;
    }

    let frsize = st.f_frsize as u64;
    let total = st.f_blocks as u64 * frsize;
    let avail = st.f_bavail as u64 * frsize;
    let used = (st.f_blocks as u64).saturating_sub(st.f_bfree as u64) * frsize;
    Some(DiskUsage {
        total,
        used,
        free: avail,
        percent: percent(used, used + avail),
    })
}

fn uname() -> Option<SystemInfo> {
    // SAFETY: zeroed utsname is a valid out-parameter for uname(2).
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    Some(SystemInfo {
        os: c_field(&uts.sysname),
        os_release: c_field(&uts.release),
        os_version: c_field(&uts.version),
        machine: c_field(&uts.machine),
        hostname: c_field(&uts.nodename),
        boot_time: 0,
    })
}

fn c_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
