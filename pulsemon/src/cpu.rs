//! Per-core and overall CPU busy percentage from `/proc/stat` tick deltas.

use crate::error::CollectError;
use crate::fs::{read_file, FileSystem};
use crate::procfs::{parse_cpu_stat, parse_loadavg, parse_uptime, CpuTimes};
use crate::rate::clamp_percent;
use crate::types::CpuSnapshot;
use crate::{now_ms, Collector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CpuConfig {
    pub proc_root: PathBuf,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

pub struct CpuCollector<F> {
    fs: Arc<F>,
    config: CpuConfig,
    prev: Option<(Instant, Vec<CpuTimes>)>,
}

impl<F: FileSystem + 'static> CpuCollector<F> {
    pub fn new(fs: Arc<F>, config: CpuConfig) -> Self {
        Self {
            fs,
            config,
            prev: None,
        }
    }

    async fn read(&self, name: &str) -> Result<String, CollectError> {
        read_file(&self.fs, self.config.proc_root.join(name)).await
    }
}

fn busy_percent(idle_delta: f64, total_delta: f64) -> f64 {
    if total_delta <= 0.0 {
        return 0.0;
    }
    clamp_percent((1.0 - idle_delta / total_delta) * 100.0)
}

/// Overall and per-core busy percentages between two readings of the same core set.
pub fn busy_percentages(prev: &[CpuTimes], cur: &[CpuTimes]) -> (f64, Vec<f64>) {
    let mut idle_sum = 0.0;
    let mut total_sum = 0.0;
    let per_core = prev
        .iter()
        .zip(cur)
        .map(|(p, c)| {
            let idle = c.idle_all() as f64 - p.idle_all() as f64;
            let total = c.total() as f64 - p.total() as f64;
            idle_sum += idle;
            total_sum += total;
            busy_percent(idle, total)
        })
        .collect();
    (busy_percent(idle_sum, total_sum), per_core)
}

impl<F: FileSystem + 'static> Collector for CpuCollector<F> {
    type Snapshot = CpuSnapshot;

    async fn sample_at(&mut self, now: Instant) -> Result<CpuSnapshot, CollectError> {
        let (stat_raw, uptime_raw, loadavg_raw) =
            tokio::try_join!(self.read("stat"), self.read("uptime"), self.read("loadavg"))?;
        let stat = parse_cpu_stat(&stat_raw);
        if stat.cores.is_empty() {
            return Err(CollectError::parse("stat", "no per-core cpu lines"));
        }
        let uptime_seconds = parse_uptime(&uptime_raw)
            .ok_or_else(|| CollectError::parse("uptime", "unreadable uptime"))?;
        let load = parse_loadavg(&loadavg_raw)
            .ok_or_else(|| CollectError::parse("loadavg", "expected three load figures"))?;

        let cores = stat.cores;
        let (interval_ms, overall_percent, per_core_percent) = match self.prev.take() {
            Some((prev_at, prev)) if prev.len() == cores.len() => {
                let (overall, per_core) = busy_percentages(&prev, &cores);
                (
                    Some(now.saturating_duration_since(prev_at).as_millis() as u64),
                    Some(overall),
                    per_core.into_iter().map(Some).collect(),
                )
            }
            // first call or hot-plug: no rates this cycle
            Some((prev_at, _)) => (
                Some(now.saturating_duration_since(prev_at).as_millis() as u64),
                None,
                vec![None; cores.len()],
            ),
            None => (None, None, vec![None; cores.len()]),
        };
        self.prev = Some((now, cores));

        Ok(CpuSnapshot {
            timestamp_ms: now_ms(),
            interval_ms,
            uptime_seconds,
            load_average: [load.one, load.five, load.fifteen],
            overall_percent,
            per_core_percent,
        })
    }
}
