use super::{DiskStat, SampleError};
use std::fs;
use sysinfo::{CpuRefreshKind, RefreshKind, System, SystemExt};

const STAT_PATH: &str = "/proc/stat";
const UPTIME_PATH: &str = "/proc/uptime";
const MEMINFO_PATH: &str = "/proc/meminfo";
const LOADAVG_PATH: &str = "/proc/loadavg";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Raw filesystem block counts as reported by `statvfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsBlocks {
    pub fragment_size: u64,
    pub total_blocks: u64,
    pub available_blocks: u64,
}

impl FsBlocks {
    /// Free space is what an unprivileged caller can use, so blocks reserved
    /// for root count as used.
    pub fn to_disk_stat(self, mountpoint: &str) -> DiskStat {
        let total_bytes = self.fragment_size.saturating_mul(self.total_blocks);
        let free_bytes = self.fragment_size.saturating_mul(self.available_blocks);
        DiskStat {
            mountpoint: mountpoint.to_string(),
            total_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            free_bytes,
        }
    }
}

/// Where the sampler gets its raw counters from.
pub trait CounterSource: Send + Sync {
    fn host_name(&self) -> Option<String>;
    fn logical_cpu_count(&self) -> Option<u32>;
    fn read_stat(&self) -> Result<String, SampleError>;
    fn read_uptime(&self) -> Result<String, SampleError>;
    fn read_meminfo(&self) -> Result<String, SampleError>;
    fn read_loadavg(&self) -> Result<String, SampleError>;
    fn fs_blocks(&self, mountpoint: &str) -> Result<FsBlocks, SampleError>;
}

pub struct ProcfsSource {
    system: System,
    cpu_count: usize,
}

impl ProcfsSource {
    pub fn new() -> Self {
        let system =
            System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
        let cpu_count = system.cpus().len();
        Self { system, cpu_count }
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for ProcfsSource {
    fn host_name(&self) -> Option<String> {
        self.system.host_name().filter(|name| !name.trim().is_empty())
    }

    fn logical_cpu_count(&self) -> Option<u32> {
        u32::try_from(self.cpu_count).ok().filter(|n| *n > 0)
    }

    fn read_stat(&self) -> Result<String, SampleError> {
        read_counter_file(STAT_PATH)
    }

    fn read_uptime(&self) -> Result<String, SampleError> {
        read_counter_file(UPTIME_PATH)
    }

    fn read_meminfo(&self) -> Result<String, SampleError> {
        read_counter_file(MEMINFO_PATH)
    }

    fn read_loadavg(&self) -> Result<String, SampleError> {
        read_counter_file(LOADAVG_PATH)
    }

    #[cfg(unix)]
    fn fs_blocks(&self, mountpoint: &str) -> Result<FsBlocks, SampleError> {
        let stat = nix::sys::statvfs::statvfs(mountpoint).map_err(|errno| {
            SampleError::Filesystem {
                mountpoint: mountpoint.to_string(),
                source: std::io::Error::from(errno),
            }
        })?;
        Ok(FsBlocks {
            fragment_size: stat.fragment_size() as u64,
            total_blocks: stat.blocks() as u64,
            available_blocks: stat.blocks_available() as u64,
        })
    }

    #[cfg(not(unix))]
    fn fs_blocks(&self, mountpoint: &str) -> Result<FsBlocks, SampleError> {
        Err(SampleError::Filesystem {
            mountpoint: mountpoint.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::Unsupported),
        })
    }
}

fn read_counter_file(path: &str) -> Result<String, SampleError> {
    fs::read_to_string(path).map_err(|source| SampleError::Read {
        path: path.to_string(),
        source,
    })
}

pub fn parse_uptime(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// First three fields of `/proc/loadavg`. All three must parse, otherwise
/// the whole reading is unknown.
pub fn parse_loadavg(text: &str) -> Option<LoadAverage> {
    let mut values = text
        .split_whitespace()
        .take(3)
        .map(|field| field.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0));
    Some(LoadAverage {
        one: values.next()??,
        five: values.next()??,
        fifteen: values.next()??,
    })
}

/// Returns `(MemTotal, MemAvailable)` in kB. Each is `None` when its line is
/// missing or unparsable.
pub fn parse_meminfo(text: &str) -> (Option<u64>, Option<u64>) {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match key {
            "MemTotal:" => total = value.parse().ok(),
            "MemAvailable:" => available = value.parse().ok(),
            _ => {}
        }
    }
    (total, available)
}
