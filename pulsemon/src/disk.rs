//! Mounted block filesystems: capacity, health and I/O throughput.
//!
//! Three sources refresh on their own cadence: the mount list (slow), per-mount capacity
//! (medium), and `/proc/diskstats` sector counters (every call).

use crate::cache::Cached;
use crate::error::CollectError;
use crate::fs::{read_file, FileSystem};
use crate::policy::MountPolicy;
use crate::procfs::{parse_diskstats, parse_mountinfo, DiskIo, MountInfo};
use crate::rate::{clamp_percent, CounterSample, UsageMetric};
use crate::types::{DiskItem, DiskSnapshot, DiskSummary, Health};
use crate::{now_ms, Collector};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub proc_root: PathBuf,
    pub mount_refresh: Duration,
    pub usage_refresh: Duration,
    pub policy: MountPolicy,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            mount_refresh: Duration::from_secs(15),
            usage_refresh: Duration::from_secs(5),
            policy: MountPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// `dev:mountpoint`, stable across refreshes.
    pub id: String,
    /// `major:minor`, the key into `/proc/diskstats`.
    pub dev: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub source: String,
}

/// Applies `policy` and keeps the first occurrence of each mountpoint.
pub fn select_mounts(raw: Vec<MountInfo>, policy: &MountPolicy) -> Vec<MountEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut mounts = Vec::new();
    for m in raw {
        if seen.contains(&m.mountpoint) || !policy.accepts(&m.fs_type, &m.source, &m.mountpoint) {
            continue;
        }
        seen.insert(m.mountpoint.clone());
        mounts.push(MountEntry {
            id: format!("{}:{}", m.dev, m.mountpoint),
            dev: m.dev,
            mountpoint: m.mountpoint,
            fs_type: m.fs_type,
            source: m.source,
        });
    }
    mounts
}

type UsageMap = HashMap<String, Option<UsageMetric>>;

pub struct DiskCollector<F> {
    fs: Arc<F>,
    config: DiskConfig,
    mounts: Cached<Vec<MountEntry>>,
    usage: Cached<UsageMap>,
    prev_io: HashMap<String, (CounterSample, CounterSample)>,
}

impl<F: FileSystem + 'static> DiskCollector<F> {
    pub fn new(fs: Arc<F>, config: DiskConfig) -> Self {
        Self {
            mounts: Cached::new(config.mount_refresh),
            usage: Cached::new(config.usage_refresh),
            fs,
            config,
            prev_io: HashMap::new(),
        }
    }

    async fn refresh_mounts(&mut self, now: Instant) -> Result<Vec<MountEntry>, CollectError> {
        if self.mounts.get().is_some_and(Vec::is_empty) {
            self.mounts.invalidate();
        }
        let fs = &self.fs;
        let policy = &self.config.policy;
        let path = self.config.proc_root.join("self/mountinfo");
        let mounts = self
            .mounts
            .get_or_try_refresh(now, || async move {
                let raw = read_file(fs, path).await?;
                let mounts = select_mounts(parse_mountinfo(&raw), policy);
                debug!(count = mounts.len(), "refreshed mount list");
                Ok::<_, CollectError>(mounts)
            })
            .await?;
        Ok(mounts.clone())
    }

    async fn refresh_usage(&mut self, now: Instant, mounts: &[MountEntry]) -> Result<(), CollectError> {
        let stale = match self.usage.get() {
            None => true,
            Some(map) => map.is_empty() || mounts.iter().any(|m| !map.contains_key(&m.id)),
        };
        if stale {
            self.usage.invalidate();
        }
        let fs = Arc::clone(&self.fs);
        self.usage
            .get_or_try_refresh(now, || query_usage(fs, mounts.to_vec()))
            .await?;
        Ok(())
    }
}

/// Capacity of every mount, queried concurrently. A failing mount maps to `None`.
async fn query_usage<F: FileSystem + 'static>(
    fs: Arc<F>,
    mounts: Vec<MountEntry>,
) -> Result<UsageMap, CollectError> {
    let tasks = mounts.into_iter().map(|m| {
        let fs = Arc::clone(&fs);
        async move {
            let mountpoint = PathBuf::from(&m.mountpoint);
            let res = tokio::task::spawn_blocking(move || fs.capacity(&mountpoint)).await;
            let usage = match res {
                Ok(Ok(cap)) => Some(UsageMetric::from_total_free(cap.total_bytes, cap.available_bytes)),
                Ok(Err(e)) => {
                    debug!(mountpoint = %m.mountpoint, "statvfs failed: {e}");
                    None
                }
                Err(e) => {
                    warn!(mountpoint = %m.mountpoint, "statvfs task failed: {e}");
                    None
                }
            };
            (m.id, usage)
        }
    });
    Ok(futures::future::join_all(tasks).await.into_iter().collect())
}

fn sort_items(items: &mut [DiskItem]) {
    // missing usage sorts after any real percentage
    let key = |i: &DiskItem| i.used_percent.unwrap_or(-1.0);
    items.sort_by(|a, b| {
        key(b)
            .total_cmp(&key(a))
            .then_with(|| a.mountpoint.cmp(&b.mountpoint))
    });
}

impl<F: FileSystem + 'static> Collector for DiskCollector<F> {
    type Snapshot = DiskSnapshot;

    async fn sample_at(&mut self, now: Instant) -> Result<DiskSnapshot, CollectError> {
        let mounts = self.refresh_mounts(now).await?;
        self.refresh_usage(now, &mounts).await?;

        let raw = read_file(&self.fs, self.config.proc_root.join("diskstats")).await?;
        let stats: HashMap<String, DiskIo> = parse_diskstats(&raw);

        let sample = |io: &DiskIo| {
            (
                CounterSample::new(io.read_bytes(), now),
                CounterSample::new(io.write_bytes(), now),
            )
        };
        let current: HashMap<String, (CounterSample, CounterSample)> =
            stats.iter().map(|(dev, io)| (dev.clone(), sample(io))).collect();
        let prev = std::mem::replace(&mut self.prev_io, current);

        let usage_map = self.usage.get();
        let mut summary = DiskSummary::default();
        let mut seen_devs: HashSet<&str> = HashSet::new();
        let mut items = Vec::with_capacity(mounts.len());

        for m in &mounts {
            let usage = usage_map.and_then(|u| u.get(&m.id).copied().flatten());
            let (read_bps, write_bps) = match (self.prev_io.get(&m.dev), prev.get(&m.dev)) {
                (Some((r, w)), Some((pr, pw))) => match (r.rate_since(pr), w.rate_since(pw)) {
                    (Some(r), Some(w)) => (Some(r), Some(w)),
                    _ => (None, None),
                },
                _ => (None, None),
            };

            if let Some(u) = &usage {
                summary.total_bytes = summary.total_bytes.saturating_add(u.total_bytes);
                summary.used_bytes = summary.used_bytes.saturating_add(u.used_bytes);
                summary.free_bytes = summary.free_bytes.saturating_add(u.free_bytes);
            }
            // a device backing several mounts contributes its throughput once
            if seen_devs.insert(m.dev.as_str()) {
                summary.read_bps += read_bps.unwrap_or(0.0);
                summary.write_bps += write_bps.unwrap_or(0.0);
            }

            let used_percent = usage.map(|u| u.used_percent);
            items.push(DiskItem {
                id: m.id.clone(),
                mountpoint: m.mountpoint.clone(),
                source: m.source.clone(),
                fs_type: m.fs_type.clone(),
                total_bytes: usage.map(|u| u.total_bytes),
                used_bytes: usage.map(|u| u.used_bytes),
                free_bytes: usage.map(|u| u.free_bytes),
                used_percent,
                read_bps,
                write_bps,
                health: Health::from_used_percent(used_percent),
            });
        }

        sort_items(&mut items);
        summary.mounts = items.len();
        summary.used_percent = if summary.total_bytes > 0 {
            clamp_percent(summary.used_bytes as f64 / summary.total_bytes as f64 * 100.0)
        } else {
            0.0
        };

        Ok(DiskSnapshot {
            timestamp_ms: now_ms(),
            summary,
            items,
        })
    }
}
