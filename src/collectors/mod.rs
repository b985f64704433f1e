pub mod cpu;
pub mod procfs;
pub mod system;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DiskStat {
    pub mountpoint: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// One point-in-time view of the host. `None` means the value could not be
/// read on this call, which is not the same as zero.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub now_ts: f64,
    pub uptime_seconds: Option<f64>,
    pub cpu_count: u32,
    pub cpu_usage_percent: Option<f64>,
    pub load1: Option<f64>,
    pub load5: Option<f64>,
    pub load15: Option<f64>,
    pub mem_total_kb: Option<u64>,
    pub mem_available_kb: Option<u64>,
    pub disks: Vec<DiskStat>,
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unexpected cpu counter line: {0:?}")]
    CpuLine(String),
    #[error("expected at least 4 cpu counters, got {0}")]
    CpuFieldCount(usize),
    #[error("counter field {field:?} is not a number")]
    NotANumber { field: String },
    #[error("empty counter file {0}")]
    Empty(String),
    #[error("filesystem stats unavailable for {mountpoint}: {source}")]
    Filesystem {
        mountpoint: String,
        source: std::io::Error,
    },
}
