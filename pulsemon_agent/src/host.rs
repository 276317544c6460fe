//! Task and thread totals, refreshed on their own slower cadence.

use crate::types::TaskCounts;
use pulsemon::procfs::parse_loadavg;
use pulsemon::{Cached, FileSystem};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const TASK_REFRESH: Duration = Duration::from_secs(5);

pub struct HostCounts<F> {
    fs: Arc<F>,
    proc_root: PathBuf,
    cache: Cached<TaskCounts>,
}

impl<F: FileSystem> HostCounts<F> {
    pub fn new(fs: Arc<F>, proc_root: PathBuf, refresh: Duration) -> Self {
        Self {
            fs,
            proc_root,
            cache: Cached::new(refresh),
        }
    }

    /// Numeric `/proc` entries and the `running/total` thread field of `loadavg`.
    pub fn get(&mut self, now: Instant) -> TaskCounts {
        let fs = &self.fs;
        let root = &self.proc_root;
        *self.cache.get_or_refresh(now, |previous| {
            let tasks = match fs.read_dir(root) {
                Ok(entries) => entries
                    .iter()
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.parse::<u32>().is_ok())
                    })
                    .count(),
                Err(e) => {
                    debug!("task count unavailable: {e}");
                    return previous.unwrap_or_default();
                }
            };
            let threads = fs
                .read_to_string(&root.join("loadavg"))
                .ok()
                .and_then(|raw| parse_loadavg(&raw))
                .and_then(|l| l.threads);
            TaskCounts { tasks, threads }
        })
    }
}
