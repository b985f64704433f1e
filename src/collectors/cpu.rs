use super::procfs::CounterSource;
use super::SampleError;
use tracing::debug;

/// Cumulative tick counters from the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

impl CpuTimes {
    /// Parses `cpu  user nice system idle [iowait irq softirq steal ...]`.
    /// Trailing guest counters are already included in user/nice by the
    /// kernel and are ignored.
    pub fn parse(line: &str) -> Result<Self, SampleError> {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("cpu") {
            return Err(SampleError::CpuLine(line.to_string()));
        }

        let fields = parts
            .map(|field| {
                field.parse::<u64>().map_err(|_| SampleError::NotANumber {
                    field: field.to_string(),
                })
            })
            .collect::<Result<Vec<u64>, _>>()?;
        if fields.len() < 4 {
            return Err(SampleError::CpuFieldCount(fields.len()));
        }

        let field = |i: usize| fields.get(i).copied().unwrap_or(0);
        let (user, nice, system, idle) = (field(0), field(1), field(2), field(3));
        let (iowait, irq, softirq, steal) = (field(4), field(5), field(6), field(7));

        let idle_all = idle.saturating_add(iowait);
        let non_idle = [user, nice, system, irq, softirq, steal]
            .into_iter()
            .fold(0_u64, u64::saturating_add);

        Ok(Self {
            total: idle_all.saturating_add(non_idle),
            idle: idle_all,
        })
    }

    /// Reads the first line of the stat text.
    pub fn from_stat(text: &str) -> Result<Self, SampleError> {
        let line = text
            .lines()
            .next()
            .ok_or_else(|| SampleError::Empty("stat".to_string()))?;
        Self::parse(line)
    }
}

/// CPU usage over the interval between two successive calls.
#[derive(Debug, Default)]
pub struct CpuSampler {
    prev: Option<CpuTimes>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, source: &dyn CounterSource) -> Option<f64> {
        let times = source
            .read_stat()
            .and_then(|text| CpuTimes::from_stat(&text));
        match times {
            Ok(times) => self.observe(times),
            Err(err) => {
                debug!(error = %err, "cpu counters unavailable");
                None
            }
        }
    }

    /// Feeds one reading into the state machine. Every successful reading
    /// becomes the next baseline, including ones that yield no value.
    pub fn observe(&mut self, times: CpuTimes) -> Option<f64> {
        let prev = self.prev.replace(times)?;

        let delta_total = i128::from(times.total) - i128::from(prev.total);
        if delta_total <= 0 {
            return None;
        }
        let delta_idle = i128::from(times.idle) - i128::from(prev.idle);
        let busy = (delta_total - delta_idle).max(0);

        let percent = busy as f64 * 100.0 / delta_total as f64;
        Some(percent.clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(total: u64, idle: u64) -> CpuTimes {
        CpuTimes { total, idle }
    }

    #[test]
    fn second_reading_yields_usage() {
        let mut sampler = CpuSampler::new();
        assert_eq!(sampler.observe(times(100, 80)), None);
        assert_eq!(sampler.observe(times(200, 100)), Some(80.0));
    }

    #[test]
    fn non_advancing_counters_rebase() {
        let mut sampler = CpuSampler::new();
        assert_eq!(sampler.observe(times(100, 80)), None);
        assert_eq!(sampler.observe(times(100, 80)), None);
        // busy = 100 - 40 against the (100, 80) baseline.
        assert_eq!(sampler.observe(times(200, 120)), Some(60.0));
    }

    #[test]
    fn counters_going_backwards_rebase() {
        let mut sampler = CpuSampler::new();
        sampler.observe(times(1_000, 500));
        assert_eq!(sampler.observe(times(10, 5)), None);
        assert_eq!(sampler.observe(times(110, 55)), Some(50.0));
    }

    #[test]
    fn idle_skew_is_clamped() {
        let mut sampler = CpuSampler::new();
        sampler.observe(times(100, 80));
        // Idle advanced more than total.
        assert_eq!(sampler.observe(times(150, 200)), Some(0.0));
        // Idle went backwards.
        assert_eq!(sampler.observe(times(250, 100)), Some(100.0));
    }

    #[test]
    fn parses_full_stat_line() {
        let parsed =
            CpuTimes::parse("cpu  10 20 30 400 50 6 7 8 0 0").expect("valid cpu line");
        assert_eq!(parsed.idle, 450);
        assert_eq!(parsed.total, 531);
    }

    #[test]
    fn missing_optional_fields_default_to_zero() {
        let parsed = CpuTimes::parse("cpu 1 2 3 4").expect("four fields are enough");
        assert_eq!(parsed, times(10, 4));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            CpuTimes::parse("cpu0 1 2 3 4"),
            Err(SampleError::CpuLine(_))
        ));
        assert!(matches!(
            CpuTimes::parse("cpu 1 2 3"),
            Err(SampleError::CpuFieldCount(3))
        ));
        assert!(matches!(
            CpuTimes::parse("cpu 1 two 3 4"),
            Err(SampleError::NotANumber { .. })
        ));
        assert!(CpuTimes::from_stat("").is_err());
    }
}
