use crate::collectors::{DiskStat, HostSnapshot};
use crate::config::{CapacityConfig, CapacityProfile, Thresholds};
use serde::Serialize;

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Unknown,
    Ok,
    Warn,
    Crit,
}

impl Level {
    /// `crit` wins over `warn` when both are crossed.
    pub fn classify(percent: Option<f64>, warn: u8, crit: u8) -> Self {
        match percent {
            None => Level::Unknown,
            Some(p) if p >= f64::from(crit) => Level::Crit,
            Some(p) if p >= f64::from(warn) => Level::Warn,
            Some(_) => Level::Ok,
        }
    }

    /// Gauge value for the level; `None` for unknown.
    pub fn severity(self) -> Option<f64> {
        match self {
            Level::Unknown => None,
            Level::Ok => Some(0.0),
            Level::Warn => Some(1.0),
            Level::Crit => Some(2.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub used_percent: Option<f64>,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStatus {
    pub mountpoint: String,
    pub used_percent: Option<f64>,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub cpu: ResourceStatus,
    pub ram: ResourceStatus,
    pub disks: Vec<DiskStatus>,
    /// Worst known level, or unknown if nothing could be classified.
    pub overall: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headroom {
    pub cores: u32,
    pub ram_mb: Option<u64>,
    pub disk_gb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileFit {
    pub profile: String,
    pub fits: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityReport {
    pub headroom: Headroom,
    pub profiles: Vec<ProfileFit>,
}

/// What `/api/snapshot` returns: the raw snapshot plus what it means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    #[serde(flatten)]
    pub snapshot: HostSnapshot,
    pub status: HealthStatus,
    pub capacity: CapacityReport,
}

impl HostReport {
    pub fn build(
        snapshot: HostSnapshot,
        thresholds: &Thresholds,
        capacity: &CapacityConfig,
    ) -> Self {
        let status = health_status(&snapshot, thresholds);
        let capacity = capacity_report(&snapshot, capacity);
        Self {
            snapshot,
            status,
            capacity,
        }
    }
}

pub fn health_status(snapshot: &HostSnapshot, t: &Thresholds) -> HealthStatus {
    let cpu_percent = snapshot.cpu_usage_percent;
    let ram_percent = ram_used_percent(snapshot.mem_total_kb, snapshot.mem_available_kb);

    let cpu = ResourceStatus {
        used_percent: cpu_percent,
        level: Level::classify(cpu_percent, t.cpu_warn, t.cpu_crit),
    };
    let ram = ResourceStatus {
        used_percent: ram_percent,
        level: Level::classify(ram_percent, t.ram_warn, t.ram_crit),
    };
    let disks: Vec<DiskStatus> = snapshot
        .disks
        .iter()
        .map(|d| {
            let used_percent = disk_used_percent(d);
            DiskStatus {
                mountpoint: d.mountpoint.clone(),
                used_percent,
                level: Level::classify(used_percent, t.disk_warn, t.disk_crit),
            }
        })
        .collect();

    let overall = disks
        .iter()
        .map(|d| d.level)
        .chain([cpu.level, ram.level])
        .max()
        .unwrap_or(Level::Unknown);

    HealthStatus {
        cpu,
        ram,
        disks,
        overall,
    }
}

fn ram_used_percent(total_kb: Option<u64>, available_kb: Option<u64>) -> Option<f64> {
    let total = total_kb.filter(|t| *t > 0)?;
    let used = total.saturating_sub(available_kb?);
    Some(used as f64 * 100.0 / total as f64)
}

// Same basis as df: root-reserved blocks count as neither used nor free.
fn disk_used_percent(d: &DiskStat) -> Option<f64> {
    let usable = d.used_bytes.saturating_add(d.free_bytes);
    if usable == 0 {
        return None;
    }
    Some(d.used_bytes as f64 * 100.0 / usable as f64)
}

/// Headroom is what is left after the host reserve: all logical cores,
/// currently available memory, and free space on the first mountpoint.
pub fn capacity_report(snapshot: &HostSnapshot, cfg: &CapacityConfig) -> CapacityReport {
    let headroom = Headroom {
        cores: snapshot.cpu_count.saturating_sub(cfg.reserve_cores),
        ram_mb: snapshot
            .mem_available_kb
            .map(|kb| (kb / 1024).saturating_sub(cfg.reserve_ram_mb)),
        disk_gb: snapshot
            .disks
            .first()
            .map(|d| (d.free_bytes / BYTES_PER_GIB).saturating_sub(cfg.reserve_disk_gb)),
    };

    let profiles = cfg
        .profiles
        .iter()
        .map(|p| ProfileFit {
            profile: p.name.clone(),
            fits: fits(&headroom, p),
        })
        .collect();

    CapacityReport { headroom, profiles }
}

fn fits(headroom: &Headroom, p: &CapacityProfile) -> Option<u64> {
    let by_cpu = u64::from(headroom.cores).checked_div(u64::from(p.vcpus))?;
    let by_ram = headroom.ram_mb?.checked_div(p.ram_mb)?;
    let by_disk = headroom.disk_gb?.checked_div(p.disk_gb)?;
    Some(by_cpu.min(by_ram).min(by_disk))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = BYTES_PER_GIB;

    fn snapshot() -> HostSnapshot {
        HostSnapshot {
            hostname: "pve-01".to_string(),
            now_ts: 1_700_000_000.0,
            uptime_seconds: Some(3600.0),
            cpu_count: 16,
            cpu_usage_percent: Some(42.0),
            load1: Some(1.0),
            load5: Some(1.0),
            load15: Some(1.0),
            mem_total_kb: Some(64 * 1024 * 1024),
            mem_available_kb: Some(40 * 1024 * 1024),
            disks: vec![
                DiskStat {
                    mountpoint: "/".to_string(),
                    total_bytes: 500 * GIB,
                    used_bytes: 200 * GIB,
                    free_bytes: 300 * GIB,
                },
                DiskStat {
                    mountpoint: "/backup".to_string(),
                    total_bytes: 100 * GIB,
                    used_bytes: 80 * GIB,
                    free_bytes: 20 * GIB,
                },
            ],
        }
    }

    #[test]
    fn classify_uses_inclusive_boundaries() {
        assert_eq!(Level::classify(Some(69.9), 70, 90), Level::Ok);
        assert_eq!(Level::classify(Some(70.0), 70, 90), Level::Warn);
        assert_eq!(Level::classify(Some(90.0), 70, 90), Level::Crit);
        assert_eq!(Level::classify(None, 70, 90), Level::Unknown);
        assert_eq!(Level::classify(Some(80.0), 80, 80), Level::Crit);
    }

    #[test]
    fn status_per_resource_with_default_thresholds() {
        let status = health_status(&snapshot(), &Thresholds::default());

        assert_eq!(status.cpu.level, Level::Ok);
        assert_eq!(status.ram.used_percent, Some(37.5));
        assert_eq!(status.ram.level, Level::Ok);
        assert_eq!(status.disks[0].used_percent, Some(40.0));
        assert_eq!(status.disks[0].level, Level::Ok);
        assert_eq!(status.disks[1].mountpoint, "/backup");
        assert_eq!(status.disks[1].level, Level::Warn);
        assert_eq!(status.overall, Level::Warn);
    }

    #[test]
    fn missing_readings_are_unknown_not_ok() {
        let mut snap = snapshot();
        snap.cpu_usage_percent = None;
        snap.mem_available_kb = None;
        snap.disks.clear();

        let status = health_status(&snap, &Thresholds::default());

        assert_eq!(status.cpu.level, Level::Unknown);
        assert_eq!(status.ram.level, Level::Unknown);
        assert!(status.ram.used_percent.is_none());
        assert_eq!(status.overall, Level::Unknown);
    }

    #[test]
    fn zero_sized_disk_is_unknown() {
        let mut snap = snapshot();
        snap.disks[0].used_bytes = 0;
        snap.disks[0].free_bytes = 0;

        let status = health_status(&snap, &Thresholds::default());
        assert_eq!(status.disks[0].level, Level::Unknown);
    }

    #[test]
    fn capacity_takes_the_tightest_resource() {
        let report = capacity_report(&snapshot(), &CapacityConfig::default());

        assert_eq!(report.headroom.cores, 15);
        assert_eq!(report.headroom.ram_mb, Some(40 * 1024 - 1024));
        assert_eq!(report.headroom.disk_gb, Some(290));
        // standard: 15/2 = 7 by cpu, 39936/4096 = 9 by ram, 290/32 = 9 by disk
        assert_eq!(report.profiles[0].profile, "standard");
        assert_eq!(report.profiles[0].fits, Some(7));
        // light: 15 by cpu, 39 by ram, 18 by disk
        assert_eq!(report.profiles[1].fits, Some(15));
    }

    #[test]
    fn single_core_host_fits_nothing_after_reserve() {
        let mut snap = snapshot();
        snap.cpu_count = 1;

        let report = capacity_report(&snap, &CapacityConfig::default());

        assert_eq!(report.headroom.cores, 0);
        assert!(report.profiles.iter().all(|p| p.fits == Some(0)));
    }

    #[test]
    fn reserve_larger_than_host_saturates_at_zero() {
        let mut snap = snapshot();
        snap.mem_available_kb = Some(512 * 1024);
        snap.disks[0].free_bytes = 4 * GIB;
        let cfg = CapacityConfig {
            reserve_cores: 64,
            ..CapacityConfig::default()
        };

        let report = capacity_report(&snap, &cfg);

        assert_eq!(report.headroom.cores, 0);
        assert_eq!(report.headroom.ram_mb, Some(0));
        assert_eq!(report.headroom.disk_gb, Some(0));
        assert!(report.profiles.iter().all(|p| p.fits == Some(0)));
    }

    #[test]
    fn unknown_memory_or_disk_gives_unknown_fit() {
        let mut snap = snapshot();
        snap.mem_available_kb = None;
        let report = capacity_report(&snap, &CapacityConfig::default());
        assert!(report.profiles.iter().all(|p| p.fits.is_none()));

        let mut snap = snapshot();
        snap.disks.clear();
        let report = capacity_report(&snap, &CapacityConfig::default());
        assert_eq!(report.headroom.disk_gb, None);
        assert!(report.profiles.iter().all(|p| p.fits.is_none()));
    }

    #[test]
    fn report_serializes_snapshot_fields_at_top_level() {
        let report = HostReport::build(
            snapshot(),
            &Thresholds::default(),
            &CapacityConfig::default(),
        );
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["hostname"], "pve-01");
        assert_eq!(value["status"]["disks"][1]["level"], "warn");
        assert_eq!(value["status"]["overall"], "warn");
        assert_eq!(value["capacity"]["profiles"][0]["fits"], 7);
    }
}
