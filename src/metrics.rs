use crate::collectors::HostSnapshot;
use crate::report::{CapacityReport, HealthStatus, HostReport};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub host_cpu_count: Gauge,
    pub host_cpu_usage_percent: GaugeVec,
    pub host_load_average: GaugeVec,
    pub host_uptime_seconds: GaugeVec,
    pub host_memory_total_bytes: GaugeVec,
    pub host_memory_available_bytes: GaugeVec,
    pub host_disk_total_bytes: GaugeVec,
    pub host_disk_used_bytes: GaugeVec,
    pub host_disk_free_bytes: GaugeVec,
    pub host_last_snapshot_timestamp_seconds: Gauge,
    pub host_resource_level: GaugeVec,
    pub host_disk_level: GaugeVec,
    pub host_capacity_vms: GaugeVec,
    pub agent_scrape_count_total: Counter,
    pub agent_snapshot_unknown_total: CounterVec,
    pub agent_auth_requests_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let host_cpu_count =
            Gauge::with_opts(opts!("host_cpu_count", "Number of logical CPUs"))?;
        let host_cpu_usage_percent = GaugeVec::new(
            opts!(
                "host_cpu_usage_percent",
                "CPU usage since the previous snapshot in percent (0..100)"
            ),
            &["host"],
        )?;
        let host_load_average = GaugeVec::new(
            opts!("host_load_average", "System load average by window"),
            &["window"],
        )?;
        let host_uptime_seconds = GaugeVec::new(
            opts!("host_uptime_seconds", "Host uptime in seconds"),
            &["host"],
        )?;
        let host_memory_total_bytes = GaugeVec::new(
            opts!("host_memory_total_bytes", "Total memory in bytes"),
            &["host"],
        )?;
        let host_memory_available_bytes = GaugeVec::new(
            opts!(
                "host_memory_available_bytes",
                "Memory available for new allocations in bytes"
            ),
            &["host"],
        )?;
        let host_disk_total_bytes = GaugeVec::new(
            opts!("host_disk_total_bytes", "Filesystem size in bytes by mountpoint"),
            &["mountpoint"],
        )?;
        let host_disk_used_bytes = GaugeVec::new(
            opts!("host_disk_used_bytes", "Filesystem used bytes by mountpoint"),
            &["mountpoint"],
        )?;
        let host_disk_free_bytes = GaugeVec::new(
            opts!(
                "host_disk_free_bytes",
                "Filesystem bytes available to unprivileged users by mountpoint"
            ),
            &["mountpoint"],
        )?;
        let host_last_snapshot_timestamp_seconds = Gauge::with_opts(opts!(
            "host_last_snapshot_timestamp_seconds",
            "Unix timestamp of the latest snapshot"
        ))?;
        let host_resource_level = GaugeVec::new(
            opts!(
                "host_resource_level",
                "Threshold level by resource (0 ok, 1 warn, 2 crit)"
            ),
            &["resource"],
        )?;
        let host_disk_level = GaugeVec::new(
            opts!(
                "host_disk_level",
                "Disk threshold level by mountpoint (0 ok, 1 warn, 2 crit)"
            ),
            &["mountpoint"],
        )?;
        let host_capacity_vms = GaugeVec::new(
            opts!(
                "host_capacity_vms",
                "VMs of each profile that fit in the remaining headroom"
            ),
            &["profile"],
        )?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let agent_snapshot_unknown_total = CounterVec::new(
            opts!(
                "agent_snapshot_unknown_total",
                "Snapshot fields that could not be read, by field"
            ),
            &["field"],
        )?;
        let agent_auth_requests_total = CounterVec::new(
            opts!(
                "agent_auth_requests_total",
                "Authentication decisions by outcome"
            ),
            &["outcome"],
        )?;

        register(&registry, &host_cpu_count)?;
        register(&registry, &host_cpu_usage_percent)?;
        register(&registry, &host_load_average)?;
        register(&registry, &host_uptime_seconds)?;
        register(&registry, &host_memory_total_bytes)?;
        register(&registry, &host_memory_available_bytes)?;
        register(&registry, &host_disk_total_bytes)?;
        register(&registry, &host_disk_used_bytes)?;
        register(&registry, &host_disk_free_bytes)?;
        register(&registry, &host_last_snapshot_timestamp_seconds)?;
        register(&registry, &host_resource_level)?;
        register(&registry, &host_disk_level)?;
        register(&registry, &host_capacity_vms)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_snapshot_unknown_total)?;
        register(&registry, &agent_auth_requests_total)?;

        Ok(Arc::new(Self {
            registry,
            host_cpu_count,
            host_cpu_usage_percent,
            host_load_average,
            host_uptime_seconds,
            host_memory_total_bytes,
            host_memory_available_bytes,
            host_disk_total_bytes,
            host_disk_used_bytes,
            host_disk_free_bytes,
            host_last_snapshot_timestamp_seconds,
            host_resource_level,
            host_disk_level,
            host_capacity_vms,
            agent_scrape_count_total,
            agent_snapshot_unknown_total,
            agent_auth_requests_total,
        }))
    }

    pub fn update_from_report(&self, report: &HostReport) {
        self.update_from_snapshot(&report.snapshot);
        self.update_status(&report.status);
        self.update_capacity(&report.capacity);
    }

    /// Unknown values drop their series, so a scrape never shows a stale
    /// reading, and bump the unknown counter for that field.
    pub fn update_from_snapshot(&self, snapshot: &HostSnapshot) {
        self.host_cpu_count.set(snapshot.cpu_count as f64);
        self.host_last_snapshot_timestamp_seconds
            .set(snapshot.now_ts);

        let host = snapshot.hostname.as_str();
        self.set_optional(
            "cpu_usage_percent",
            &self.host_cpu_usage_percent,
            host,
            snapshot.cpu_usage_percent,
        );
        self.set_optional(
            "uptime_seconds",
            &self.host_uptime_seconds,
            host,
            snapshot.uptime_seconds,
        );
        self.set_optional(
            "mem_total_kb",
            &self.host_memory_total_bytes,
            host,
            snapshot.mem_total_kb.map(|kb| kb as f64 * 1024.0),
        );
        self.set_optional(
            "mem_available_kb",
            &self.host_memory_available_bytes,
            host,
            snapshot.mem_available_kb.map(|kb| kb as f64 * 1024.0),
        );

        self.host_load_average.reset();
        let load = [
            ("1m", snapshot.load1),
            ("5m", snapshot.load5),
            ("15m", snapshot.load15),
        ];
        if load.iter().any(|(_, v)| v.is_none()) {
            self.agent_snapshot_unknown_total
                .with_label_values(&["load_average"])
                .inc();
        }
        for (window, value) in load {
            if let Some(v) = value {
                self.host_load_average.with_label_values(&[window]).set(v);
            }
        }

        self.host_disk_total_bytes.reset();
        self.host_disk_used_bytes.reset();
        self.host_disk_free_bytes.reset();
        for d in &snapshot.disks {
            let labels = [d.mountpoint.as_str()];
            self.host_disk_total_bytes
                .with_label_values(&labels)
                .set(d.total_bytes as f64);
            self.host_disk_used_bytes
                .with_label_values(&labels)
                .set(d.used_bytes as f64);
            self.host_disk_free_bytes
                .with_label_values(&labels)
                .set(d.free_bytes as f64);
        }
    }

    fn update_status(&self, status: &HealthStatus) {
        self.host_resource_level.reset();
        for (resource, level) in [
            ("cpu", status.cpu.level),
            ("ram", status.ram.level),
            ("overall", status.overall),
        ] {
            if let Some(v) = level.severity() {
                self.host_resource_level
                    .with_label_values(&[resource])
                    .set(v);
            }
        }

        self.host_disk_level.reset();
        for d in &status.disks {
            if let Some(v) = d.level.severity() {
                self.host_disk_level
                    .with_label_values(&[d.mountpoint.as_str()])
                    .set(v);
            }
        }
    }

    fn update_capacity(&self, capacity: &CapacityReport) {
        self.host_capacity_vms.reset();
        for p in &capacity.profiles {
            if let Some(n) = p.fits {
                self.host_capacity_vms
                    .with_label_values(&[p.profile.as_str()])
                    .set(n as f64);
            }
        }
    }

    // Reset rather than remove by label so a hostname change cannot leave
    // the old host's series behind.
    fn set_optional(&self, field: &str, gauge: &GaugeVec, host: &str, value: Option<f64>) {
        gauge.reset();
        match value {
            Some(v) => gauge.with_label_values(&[host]).set(v),
            None => self
                .agent_snapshot_unknown_total
                .with_label_values(&[field])
                .inc(),
        }
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn inc_auth_outcome(&self, outcome: &str) {
        self.agent_auth_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
