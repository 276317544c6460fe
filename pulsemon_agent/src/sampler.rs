//! Periodic sampling pass: runs every enabled collector concurrently, keeps the last
//! good snapshot per family, and writes one JSON line per tick.

use crate::config::AgentConfig;
use crate::host::{HostCounts, TASK_REFRESH};
use crate::state::{keep, AgentState};
use anyhow::Context;
use pulsemon::{
    Collector, CpuCollector, CpuConfig, DiskCollector, DiskConfig, FileSystem, GpuCollector,
    GpuConfig, MemoryCollector, MemoryConfig, NetworkCollector, NetworkConfig, NvidiaSmi,
    ProcessCollector, ProcessConfig, RealFs,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct Sampler<F> {
    cpu: CpuCollector<F>,
    memory: MemoryCollector<F>,
    disk: DiskCollector<F>,
    network: NetworkCollector<F>,
    processes: Option<ProcessCollector<F>>,
    gpu: Option<GpuCollector<NvidiaSmi>>,
    host: HostCounts<F>,
    state: AgentState,
}

impl Sampler<RealFs> {
    pub fn new(config: &AgentConfig, hostname: String) -> Self {
        Self::with_fs(Arc::new(RealFs::new()), config, hostname)
    }
}

impl<F: FileSystem + 'static> Sampler<F> {
    pub fn with_fs(fs: Arc<F>, config: &AgentConfig, hostname: String) -> Self {
        let mut proc_config = ProcessConfig::default();
        if let Some(n) = config.proc_concurrency {
            proc_config.read_concurrency = n;
        }
        Self {
            cpu: CpuCollector::new(fs.clone(), CpuConfig::default()),
            memory: MemoryCollector::new(fs.clone(), MemoryConfig::default()),
            disk: DiskCollector::new(fs.clone(), DiskConfig::default()),
            network: NetworkCollector::new(fs.clone(), NetworkConfig::default()),
            processes: config
                .processes
                .then(|| ProcessCollector::new(fs.clone(), proc_config)),
            gpu: config
                .gpu
                .then(|| GpuCollector::nvidia(GpuConfig::default())),
            host: HostCounts::new(fs, PathBuf::from("/proc"), TASK_REFRESH),
            state: AgentState::new(hostname),
        }
    }

    /// One pass over every collector; returns the serialized payload.
    pub async fn pass(&mut self, now: Instant) -> anyhow::Result<String> {
        let Self {
            cpu,
            memory,
            disk,
            network,
            processes,
            gpu,
            host,
            state,
        } = self;
        let (cpu_res, memory_res, disk_res, network_res, processes_res, gpu_res) = tokio::join!(
            cpu.sample_at(now),
            memory.sample_at(now),
            disk.sample_at(now),
            network.sample_at(now),
            async {
                match processes.as_mut() {
                    Some(p) => Some(p.sample_at(now).await),
                    None => None,
                }
            },
            async {
                match gpu.as_mut() {
                    Some(g) => Some(g.sample_at(now).await),
                    None => None,
                }
            },
        );

        keep(&mut state.cpu, "cpu", cpu_res);
        keep(&mut state.memory, "memory", memory_res);
        keep(&mut state.disk, "disk", disk_res);
        keep(&mut state.network, "network", network_res);
        if let Some(res) = processes_res {
            keep(&mut state.processes, "processes", res);
        }
        if let Some(res) = gpu_res {
            keep(&mut state.gpu, "gpu", res);
        }
        state.tasks = Some(host.get(now));

        let payload = state.payload(chrono::Utc::now().timestamp_millis());
        serde_json::to_string(&payload).context("serialize payload")
    }
}

fn emit(line: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()
}

/// Warm-up pass, one interval of waiting, then a single payload with rates populated.
pub async fn run_once<F: FileSystem + 'static>(
    sampler: &mut Sampler<F>,
    period: Duration,
) -> anyhow::Result<()> {
    sampler.pass(Instant::now()).await?;
    tokio::time::sleep(period).await;
    let line = sampler.pass(Instant::now()).await?;
    emit(&line).context("write payload")
}

/// Samples every `period` until interrupted. A pass that overruns skips ticks instead
/// of queueing them.
pub async fn run<F: FileSystem + 'static>(
    mut sampler: Sampler<F>,
    period: Duration,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping sampler");
                return Ok(());
            }
        }
        let started = Instant::now();
        let line = sampler.pass(started).await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "sampling pass done");
        match emit(&line) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                info!("stdout closed, stopping sampler");
                return Ok(());
            }
            Err(e) => return Err(e).context("write payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvDefaults, ParsedArgs};
    use pulsemon::MockFs;

    fn fake_host() -> Arc<MockFs> {
        let fs = Arc::new(MockFs::new());
        fs.add_file("/proc/stat", "cpu 10 0 10 80\ncpu0 10 0 10 80\n");
        fs.add_file("/proc/uptime", "5.0 5.0\n");
        fs.add_file("/proc/loadavg", "0.1 0.1 0.1 1/50 7\n");
        fs.add_file("/proc/meminfo", "MemTotal: 1000 kB\nMemAvailable: 500 kB\n");
        fs.add_file("/proc/self/mountinfo", "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n");
        fs.add_file("/proc/diskstats", "   8       1 sda1 1 0 8 0 1 0 8 0 0 0 0\n");
        fs.add_file(
            "/proc/net/dev",
            "h1\nh2\n  eth0: 1 1 0 0 0 0 0 0 1 1 0 0 0 0 0 0\n",
        );
        fs.set_capacity("/", 100, 25);
        fs
    }

    fn config() -> AgentConfig {
        let args = ParsedArgs {
            no_gpu: true,
            no_processes: true,
            ..Default::default()
        };
        AgentConfig::resolve(&args, &EnvDefaults::default())
    }

    #[tokio::test]
    async fn pass_emits_every_family() {
        let mut s = Sampler::with_fs(fake_host(), &config(), "test-host".into());
        let line = s.pass(Instant::now()).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["hostname"], "test-host");
        assert_eq!(v["memory"]["ram"]["used_percent"], 50.0);
        assert_eq!(v["disk"]["items"][0]["mountpoint"], "/");
        assert_eq!(v["network"]["items"][0]["iface"], "eth0");
        assert!(v["cpu"]["overall_percent"].is_null());
        assert!(v["gpu"].is_null());
        assert!(v["processes"].is_null());
    }

    #[tokio::test]
    async fn failed_family_keeps_previous_snapshot() {
        let fs = fake_host();
        let mut s = Sampler::with_fs(fs.clone(), &config(), "h".into());
        let t0 = Instant::now();
        s.pass(t0).await.unwrap();

        fs.remove("/proc/meminfo");
        let line = s.pass(t0 + Duration::from_secs(1)).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["memory"]["ram"]["used_percent"], 50.0);
        assert_eq!(v["cpu"]["overall_percent"], 0.0);
    }
}
