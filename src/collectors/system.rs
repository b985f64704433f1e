use crate::collectors::cpu::CpuSampler;
use crate::collectors::procfs::{
    parse_loadavg, parse_meminfo, parse_uptime, CounterSource, ProcfsSource,
};
use crate::collectors::{DiskStat, HostSnapshot};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const UNKNOWN_HOST: &str = "unknown";

/// Process-wide sampler. The CPU baseline is shared by every caller, so
/// concurrent snapshots take turns on it.
pub struct Sampler {
    source: Box<dyn CounterSource>,
    cpu: Mutex<CpuSampler>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::with_source(ProcfsSource::new())
    }

    pub fn with_source(source: impl CounterSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cpu: Mutex::new(CpuSampler::new()),
        }
    }

    pub fn sample_cpu(&self) -> Option<f64> {
        let mut cpu = self.cpu.lock().unwrap_or_else(PoisonError::into_inner);
        cpu.sample(self.source.as_ref())
    }

    pub fn snapshot(&self, mountpoints: &[String]) -> HostSnapshot {
        let hostname = self
            .source
            .host_name()
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        let cpu_count = self.source.logical_cpu_count().unwrap_or(1).max(1);
        let cpu_usage_percent = self.sample_cpu();
        let load = match self.source.read_loadavg() {
            Ok(text) => parse_loadavg(&text),
            Err(err) => {
                debug!(error = %err, "load average unavailable");
                None
            }
        };

        let uptime_seconds = match self.source.read_uptime() {
            Ok(text) => parse_uptime(&text),
            Err(err) => {
                debug!(error = %err, "uptime unavailable");
                None
            }
        };

        let (mem_total_kb, mem_available_kb) = match self.source.read_meminfo() {
            Ok(text) => parse_meminfo(&text),
            Err(err) => {
                debug!(error = %err, "meminfo unavailable");
                (None, None)
            }
        };

        HostSnapshot {
            hostname,
            now_ts: now_ts(),
            uptime_seconds,
            cpu_count,
            cpu_usage_percent,
            load1: load.map(|l| l.one),
            load5: load.map(|l| l.five),
            load15: load.map(|l| l.fifteen),
            mem_total_kb,
            mem_available_kb,
            disks: self.collect_disks(mountpoints),
        }
    }

    fn collect_disks(&self, mountpoints: &[String]) -> Vec<DiskStat> {
        mountpoints
            .iter()
            .filter_map(|mountpoint| match self.source.fs_blocks(mountpoint) {
                Ok(blocks) => Some(blocks.to_disk_stat(mountpoint)),
                Err(err) => {
                    warn!(mountpoint = %mountpoint, error = %err, "skipping mountpoint");
                    None
                }
            })
            .collect()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
