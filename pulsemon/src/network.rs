//! Per-interface throughput from `/proc/net/dev`, with link state and speed from sysfs.

use crate::cache::Cached;
use crate::error::CollectError;
use crate::fs::{read_file, FileSystem};
use crate::policy::InterfacePolicy;
use crate::procfs::{parse_net_dev, NetDevCounters};
use crate::rate::CounterSample;
use crate::types::{NetworkItem, NetworkSnapshot, NetworkSummary};
use crate::{now_ms, Collector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub metadata_refresh: Duration,
    pub policy: InterfacePolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            metadata_refresh: Duration::from_secs(5),
            policy: InterfacePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMeta {
    pub state: String,
    pub speed_mbps: Option<u64>,
}

impl Default for InterfaceMeta {
    fn default() -> Self {
        Self {
            state: "unknown".into(),
            speed_mbps: None,
        }
    }
}

fn read_meta<F: FileSystem>(fs: &F, sys_root: &Path, iface: &str) -> InterfaceMeta {
    let dir = sys_root.join("class/net").join(iface);
    let read = |name: &str| {
        fs.read_to_string(&dir.join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    InterfaceMeta {
        state: read("operstate").unwrap_or_else(|| "unknown".into()),
        // down links report -1 or fail the read outright
        speed_mbps: read("speed")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .map(|v| v as u64),
    }
}

pub struct NetworkCollector<F> {
    fs: Arc<F>,
    config: NetworkConfig,
    metadata: Cached<HashMap<String, InterfaceMeta>>,
    prev: HashMap<String, (CounterSample, CounterSample)>,
}

impl<F: FileSystem + 'static> NetworkCollector<F> {
    pub fn new(fs: Arc<F>, config: NetworkConfig) -> Self {
        Self {
            metadata: Cached::new(config.metadata_refresh),
            fs,
            config,
            prev: HashMap::new(),
        }
    }

    async fn refresh_metadata(
        &mut self,
        now: Instant,
        ifaces: Vec<String>,
    ) -> Result<HashMap<String, InterfaceMeta>, CollectError> {
        let missing = self
            .metadata
            .get()
            .is_some_and(|m| ifaces.iter().any(|i| !m.contains_key(i)));
        if missing {
            self.metadata.invalidate();
        }
        let fs = Arc::clone(&self.fs);
        let sys_root = self.config.sys_root.clone();
        let metadata = self
            .metadata
            .get_or_try_refresh(now, || async move {
                debug!(count = ifaces.len(), "refreshing interface metadata");
                let read_all = move || {
                    ifaces
                        .into_iter()
                        .map(|i| {
                            let meta = read_meta(&*fs, &sys_root, &i);
                            (i, meta)
                        })
                        .collect::<HashMap<_, _>>()
                };
                tokio::task::spawn_blocking(read_all)
                    .await
                    .map_err(CollectError::from)
            })
            .await?;
        Ok(metadata.clone())
    }
}

fn sort_items(items: &mut [NetworkItem]) {
    let load = |i: &NetworkItem| i.rx_bps.unwrap_or(0.0) + i.tx_bps.unwrap_or(0.0);
    items.sort_by(|a, b| load(b).total_cmp(&load(a)).then_with(|| a.iface.cmp(&b.iface)));
}

impl<F: FileSystem + 'static> Collector for NetworkCollector<F> {
    type Snapshot = NetworkSnapshot;

    async fn sample_at(&mut self, now: Instant) -> Result<NetworkSnapshot, CollectError> {
        let raw = read_file(&self.fs, self.config.proc_root.join("net/dev")).await?;
        let counters: Vec<NetDevCounters> = parse_net_dev(&raw)
            .into_iter()
            .filter(|c| self.config.policy.accepts(&c.iface))
            .collect();

        let names: Vec<String> = counters.iter().map(|c| c.iface.clone()).collect();
        let metadata = self.refresh_metadata(now, names).await?;

        let current: HashMap<String, (CounterSample, CounterSample)> = counters
            .iter()
            .map(|c| {
                (
                    c.iface.clone(),
                    (
                        CounterSample::new(c.rx_bytes, now),
                        CounterSample::new(c.tx_bytes, now),
                    ),
                )
            })
            .collect();
        let prev = std::mem::replace(&mut self.prev, current);

        let mut summary = NetworkSummary::default();
        let mut items = Vec::with_capacity(counters.len());
        for c in counters {
            let (rx_bps, tx_bps) = match (prev.get(&c.iface), self.prev.get(&c.iface)) {
                (Some((prx, ptx)), Some((rx, tx))) => match (rx.rate_since(prx), tx.rate_since(ptx)) {
                    (Some(r), Some(t)) => (Some(r), Some(t)),
                    _ => (None, None),
                },
                _ => (None, None),
            };
            summary.rx_bps += rx_bps.unwrap_or(0.0);
            summary.tx_bps += tx_bps.unwrap_or(0.0);

            let meta = metadata.get(&c.iface).cloned().unwrap_or_default();
            items.push(NetworkItem {
                iface: c.iface,
                state: meta.state,
                speed_mbps: meta.speed_mbps,
                rx_bytes: c.rx_bytes,
                tx_bytes: c.tx_bytes,
                rx_packets: c.rx_packets,
                tx_packets: c.tx_packets,
                rx_errors: c.rx_errors,
                tx_errors: c.tx_errors,
                rx_drops: c.rx_drops,
                tx_drops: c.tx_drops,
                rx_bps,
                tx_bps,
            });
        }

        sort_items(&mut items);
        summary.interfaces = items.len();
        Ok(NetworkSnapshot {
            timestamp_ms: now_ms(),
            summary,
            items,
        })
    }
}
