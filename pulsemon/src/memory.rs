//! RAM and swap usage from `/proc/meminfo`. Stateless between calls.

use crate::error::CollectError;
use crate::fs::{read_file, FileSystem};
use crate::procfs::parse_meminfo;
use crate::rate::UsageMetric;
use crate::types::MemorySnapshot;
use crate::{now_ms, Collector};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub proc_root: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

pub struct MemoryCollector<F> {
    fs: Arc<F>,
    config: MemoryConfig,
}

impl<F: FileSystem> MemoryCollector<F> {
    pub fn new(fs: Arc<F>, config: MemoryConfig) -> Self {
        Self { fs, config }
    }
}

/// RAM counts `MemAvailable` as free (falling back to `MemFree` on old kernels).
pub fn memory_from_meminfo(values: &HashMap<String, u64>) -> (Option<UsageMetric>, Option<UsageMetric>) {
    let usage = |total: Option<&u64>, free: Option<&u64>| {
        Some(UsageMetric::from_total_free(*total?, *free?))
    };
    let ram_free = values.get("MemAvailable").or_else(|| values.get("MemFree"));
    (
        usage(values.get("MemTotal"), ram_free),
        usage(values.get("SwapTotal"), values.get("SwapFree")),
    )
}

impl<F: FileSystem + 'static> Collector for MemoryCollector<F> {
    type Snapshot = MemorySnapshot;

    async fn sample_at(&mut self, _now: Instant) -> Result<MemorySnapshot, CollectError> {
        let raw = read_file(&self.fs, self.config.proc_root.join("meminfo")).await?;
        let (ram, swap) = memory_from_meminfo(&parse_meminfo(&raw));
        Ok(MemorySnapshot {
            timestamp_ms: now_ms(),
            ram,
            swap,
        })
    }
}
