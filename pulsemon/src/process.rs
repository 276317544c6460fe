//! Live process table with per-process CPU share.
//!
//! Each call enumerates `/proc`, then a fixed-size pool of blocking workers pulls PIDs
//! from a shared queue and reads `stat`, `statm`, `cmdline` and the owner for each.
//! A PID that vanishes or denies access mid-scan is simply left out.

use crate::cache::Cached;
use crate::error::CollectError;
use crate::fs::{read_file, FileSystem};
use crate::procfs::{format_cmdline, parse_cpu_stat, parse_passwd, parse_proc_stat, parse_statm};
use crate::types::{ProcessItem, ProcessSnapshot, ProcessSummary};
use crate::{now_ms, Collector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub proc_root: PathBuf,
    pub passwd_path: PathBuf,
    pub user_refresh: Duration,
    /// Upper bound on concurrent per-PID readers.
    pub read_concurrency: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            passwd_path: PathBuf::from("/etc/passwd"),
            user_refresh: Duration::from_secs(300),
            read_concurrency: 48,
        }
    }
}

/// Everything read for one PID before usernames and CPU share are resolved.
#[derive(Debug, Clone)]
struct RawProcess {
    pid: u32,
    uid: u32,
    state: String,
    cpu_ticks: u64,
    virt_bytes: Option<u64>,
    res_bytes: u64,
    shr_bytes: u64,
    command: String,
}

fn read_process<F: FileSystem>(fs: &F, proc_root: &Path, pid: u32) -> Option<RawProcess> {
    let dir = proc_root.join(pid.to_string());
    let stat = parse_proc_stat(&fs.read_to_string(&dir.join("stat")).ok()?)?;
    let statm = parse_statm(&fs.read_to_string(&dir.join("statm")).ok()?)?;
    let cmdline = fs.read_to_string(&dir.join("cmdline")).ok()?;
    let uid = fs.owner_uid(&dir).ok()?;
    Some(RawProcess {
        pid,
        uid,
        command: format_cmdline(&cmdline, &stat.comm),
        state: stat.state,
        cpu_ticks: stat.cpu_ticks,
        virt_bytes: stat.vsize_bytes,
        res_bytes: statm.res_bytes,
        shr_bytes: statm.shr_bytes,
    })
}

/// Reads every PID with at most `limit` blocking workers in flight.
async fn read_all<F: FileSystem + 'static>(
    fs: Arc<F>,
    proc_root: PathBuf,
    pids: Vec<u32>,
    limit: usize,
) -> Result<Vec<RawProcess>, CollectError> {
    let workers = limit.min(pids.len()).max(1);
    let queue = Arc::new(Mutex::new(pids.into_iter()));
    let proc_root = Arc::new(proc_root);

    let handles = (0..workers).map(|_| {
        let fs = Arc::clone(&fs);
        let queue = Arc::clone(&queue);
        let proc_root = Arc::clone(&proc_root);
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            loop {
                let next = match queue.lock() {
                    Ok(mut q) => q.next(),
                    Err(_) => None,
                };
                let Some(pid) = next else { break };
                if let Some(p) = read_process(&*fs, &proc_root, pid) {
                    out.push(p);
                }
            }
            out
        })
    });

    let mut all = Vec::new();
    for res in futures::future::join_all(handles).await {
        all.extend(res?);
    }
    Ok(all)
}

/// `tick_delta / total_delta * cores * 100`, or `None` when the PID has no usable history.
pub fn process_cpu_percent(
    prev_ticks: Option<u64>,
    cur_ticks: u64,
    total_delta: Option<u64>,
    cores: usize,
) -> Option<f64> {
    let prev = prev_ticks?;
    let total = total_delta.filter(|t| *t > 0)?;
    // ticks going backwards means the PID was reused by a new process
    let delta = cur_ticks.checked_sub(prev)?;
    let pct = delta as f64 / total as f64 * cores as f64 * 100.0;
    Some(if pct.is_finite() { pct.max(0.0) } else { 0.0 })
}

pub struct ProcessCollector<F> {
    fs: Arc<F>,
    config: ProcessConfig,
    users: Cached<HashMap<u32, String>>,
    prev_ticks: HashMap<u32, u64>,
    prev_total: Option<u64>,
}

impl<F: FileSystem + 'static> ProcessCollector<F> {
    pub fn new(fs: Arc<F>, config: ProcessConfig) -> Self {
        Self {
            users: Cached::new(config.user_refresh),
            fs,
            config,
            prev_ticks: HashMap::new(),
            prev_total: None,
        }
    }

    fn refresh_users(&mut self, now: Instant) -> &HashMap<u32, String> {
        let fs = &self.fs;
        let path = &self.config.passwd_path;
        self.users.get_or_refresh(now, |previous| match fs.read_to_string(path) {
            Ok(raw) => parse_passwd(&raw),
            Err(e) => {
                warn!(path = %path.display(), "user table unreadable, keeping previous: {e}");
                previous.unwrap_or_default()
            }
        })
    }

    async fn list_pids(&self) -> Result<Vec<u32>, CollectError> {
        let fs = Arc::clone(&self.fs);
        let root = self.config.proc_root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<u32>, CollectError> {
            let entries = fs.read_dir(&root).map_err(|e| CollectError::io(&root, e))?;
            Ok(entries
                .iter()
                .filter_map(|p| p.file_name()?.to_str()?.parse::<u32>().ok())
                .collect())
        })
        .await?
    }
}

impl<F: FileSystem + 'static> Collector for ProcessCollector<F> {
    type Snapshot = ProcessSnapshot;

    async fn sample_at(&mut self, now: Instant) -> Result<ProcessSnapshot, CollectError> {
        let (raw, pids) = tokio::try_join!(
            read_file(&self.fs, self.config.proc_root.join("stat")),
            self.list_pids(),
        )?;
        let stat = parse_cpu_stat(&raw);
        let total = stat
            .all
            .map(|t| t.total())
            .ok_or_else(|| CollectError::parse("stat", "missing aggregate cpu line"))?;
        let cores = stat.cores.len().max(1);

        let scanned = pids.len();
        let raws = read_all(
            Arc::clone(&self.fs),
            self.config.proc_root.clone(),
            pids,
            self.config.read_concurrency,
        )
        .await?;
        debug!(scanned, read = raws.len(), "process scan complete");

        let total_delta = self
            .prev_total
            .filter(|prev| total > *prev)
            .map(|prev| total - prev);
        let users = self.refresh_users(now).clone();

        let mut next_ticks = HashMap::with_capacity(raws.len());
        let mut items: Vec<ProcessItem> = raws
            .into_iter()
            .map(|p| {
                next_ticks.insert(p.pid, p.cpu_ticks);
                let cpu_percent = process_cpu_percent(
                    self.prev_ticks.get(&p.pid).copied(),
                    p.cpu_ticks,
                    total_delta,
                    cores,
                );
                ProcessItem {
                    pid: p.pid,
                    user: users
                        .get(&p.uid)
                        .cloned()
                        .unwrap_or_else(|| p.uid.to_string()),
                    virt_bytes: p.virt_bytes,
                    res_bytes: p.res_bytes,
                    shr_bytes: p.shr_bytes,
                    cpu_percent,
                    state: p.state,
                    command: p.command,
                }
            })
            .collect();

        self.prev_ticks = next_ticks;
        self.prev_total = Some(total);
        items.sort_by_key(|i| i.pid);

        Ok(ProcessSnapshot {
            timestamp_ms: now_ms(),
            summary: ProcessSummary {
                processes: items.len(),
            },
            items,
        })
    }
}
