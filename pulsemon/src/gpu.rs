//! NVIDIA GPU telemetry via `nvidia-smi` CSV queries.
//!
//! The first failed device query turns the collector off for good: hosts without the
//! tool or a driver would otherwise pay for a subprocess spawn every tick.

use crate::error::CollectError;
use crate::types::{GpuDevice, GpuProcess, GpuSnapshot, GpuSummary};
use crate::{now_ms, Collector};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const GPU_FIELDS: &[&str] = &[
    "index",
    "uuid",
    "name",
    "utilization.gpu",
    "memory.used",
    "memory.total",
    "temperature.gpu",
    "power.draw",
    "power.limit",
    "fan.speed",
    "pstate",
];

pub const PROCESS_FIELDS: &[&str] = &["pid", "gpu_uuid", "used_memory", "process_name"];

const NOT_FOUND: &str = "nvidia-smi not found";
const UNAVAILABLE: &str = "nvidia-smi unavailable";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("exited with status {status:?}: {stderr}")]
    Exit { status: Option<i32>, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs one tabular device query and returns its raw CSV output.
pub trait DeviceQuery: Send + Sync {
    fn query(
        &self,
        scope: &str,
        fields: &[&str],
    ) -> impl Future<Output = Result<String, QueryError>> + Send;
}

#[derive(Debug, Clone)]
pub struct GpuConfig {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nvidia-smi"),
            timeout: Duration::from_millis(2500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    config: GpuConfig,
}

impl NvidiaSmi {
    pub fn new(config: GpuConfig) -> Self {
        Self { config }
    }
}

impl DeviceQuery for NvidiaSmi {
    async fn query(&self, scope: &str, fields: &[&str]) -> Result<String, QueryError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(format!("--query-{scope}={}", fields.join(",")))
            .arg("--format=csv,noheader,nounits")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueryError::NotFound(self.config.binary.display().to_string()))
            }
            Ok(Err(e)) => return Err(QueryError::Io(e)),
            Err(_elapsed) => return Err(QueryError::Timeout(self.config.timeout)),
        };
        if !output.status.success() {
            return Err(QueryError::Exit {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Maps a failed device query to the reason shown to users.
pub fn classify_reason(err: &QueryError) -> String {
    let message = match err {
        QueryError::NotFound(_) => return NOT_FOUND.to_string(),
        QueryError::Timeout(_) => return UNAVAILABLE.to_string(),
        QueryError::Exit { stderr, .. } if stderr.is_empty() => return UNAVAILABLE.to_string(),
        QueryError::Exit { stderr, .. } => stderr.clone(),
        QueryError::Io(e) => e.to_string(),
    };
    let lower = message.to_lowercase();
    if lower.contains("not found") {
        NOT_FOUND.to_string()
    } else if lower.contains("nvidia-smi has failed") {
        UNAVAILABLE.to_string()
    } else {
        message
    }
}

/// Splits one CSV row, honouring double quotes around cells that contain commas.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => values.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(ch),
        }
    }
    values.push(current.trim().to_string());
    values
}

fn text(cell: &str) -> Option<String> {
    let cell = cell.trim();
    match cell {
        "" | "N/A" | "[N/A]" => None,
        _ => Some(cell.to_string()),
    }
}

fn number(cell: &str) -> Option<f64> {
    text(cell)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn integer(cell: &str) -> Option<u32> {
    text(cell)?.parse().ok()
}

/// Device rows in index order; short rows are dropped.
pub fn parse_gpu_rows(raw: &str) -> Vec<GpuDevice> {
    let mut gpus: Vec<GpuDevice> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(parse_csv_line)
        .filter(|f| f.len() >= GPU_FIELDS.len())
        .map(|f| {
            let index = integer(&f[0]);
            let memory_used_mib = number(&f[4]);
            let memory_total_mib = number(&f[5]);
            GpuDevice {
                index,
                uuid: text(&f[1]),
                name: text(&f[2]).unwrap_or_else(|| match index {
                    Some(i) => format!("GPU{i}"),
                    None => "GPU?".to_string(),
                }),
                utilization_gpu_percent: number(&f[3]),
                memory_used_mib,
                memory_total_mib,
                memory_used_percent: match (memory_used_mib, memory_total_mib) {
                    (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
                    _ => None,
                },
                temperature_c: number(&f[6]),
                power_draw_w: number(&f[7]),
                power_limit_w: number(&f[8]),
                fan_percent: number(&f[9]),
                pstate: text(&f[10]),
            }
        })
        .collect();
    gpus.sort_by_key(|g| g.index.unwrap_or(u32::MAX));
    gpus
}

/// Compute processes joined to their device by UUID, heaviest first.
pub fn parse_process_rows(raw: &str, gpus: &[GpuDevice]) -> Vec<GpuProcess> {
    let by_uuid: HashMap<&str, &GpuDevice> = gpus
        .iter()
        .filter_map(|g| Some((g.uuid.as_deref()?, g)))
        .collect();

    let mut processes: Vec<GpuProcess> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("No running processes found"))
        .map(parse_csv_line)
        .filter(|f| f.len() >= PROCESS_FIELDS.len())
        .map(|f| {
            let gpu_uuid = text(&f[1]);
            let gpu = gpu_uuid.as_deref().and_then(|u| by_uuid.get(u));
            GpuProcess {
                pid: integer(&f[0]),
                gpu_index: gpu.and_then(|g| g.index),
                gpu_name: gpu.map(|g| g.name.clone()),
                gpu_uuid,
                used_memory_mib: number(&f[2]),
                process_name: text(&f[3]).unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    processes.sort_by(|a, b| {
        let mem = |p: &GpuProcess| p.used_memory_mib.unwrap_or(-1.0);
        mem(b)
            .total_cmp(&mem(a))
            .then_with(|| a.pid.unwrap_or(u32::MAX).cmp(&b.pid.unwrap_or(u32::MAX)))
    });
    processes
}

pub fn summarize(gpus: &[GpuDevice], processes: &[GpuProcess]) -> GpuSummary {
    let utils: Vec<f64> = gpus.iter().filter_map(|g| g.utilization_gpu_percent).collect();
    GpuSummary {
        gpus: gpus.len(),
        processes: processes.len(),
        total_memory_used_mib: gpus.iter().filter_map(|g| g.memory_used_mib).sum(),
        total_memory_mib: gpus.iter().filter_map(|g| g.memory_total_mib).sum(),
        average_utilization_percent: if utils.is_empty() {
            None
        } else {
            Some(utils.iter().sum::<f64>() / utils.len() as f64)
        },
    }
}

/// Whether the device query tool has been probed, and how that went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuState {
    Unknown,
    Available,
    /// Terminal for the lifetime of the collector.
    Unavailable(String),
}

pub struct GpuCollector<Q> {
    query: Q,
    state: GpuState,
}

impl GpuCollector<NvidiaSmi> {
    pub fn nvidia(config: GpuConfig) -> Self {
        Self::new(NvidiaSmi::new(config))
    }
}

impl<Q: DeviceQuery> GpuCollector<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            state: GpuState::Unknown,
        }
    }

    pub fn state(&self) -> &GpuState {
        &self.state
    }
}

fn unavailable(reason: &str) -> GpuSnapshot {
    GpuSnapshot {
        timestamp_ms: now_ms(),
        available: false,
        reason: Some(reason.to_string()),
        summary: None,
        gpus: Vec::new(),
        processes: Vec::new(),
    }
}

impl<Q: DeviceQuery> Collector for GpuCollector<Q> {
    type Snapshot = GpuSnapshot;

    async fn sample_at(&mut self, _now: Instant) -> Result<GpuSnapshot, CollectError> {
        if let GpuState::Unavailable(reason) = &self.state {
            return Ok(unavailable(reason));
        }

        let raw = match self.query.query("gpu", GPU_FIELDS).await {
            Ok(raw) => raw,
            Err(e) => {
                let reason = classify_reason(&e);
                info!(%reason, "gpu telemetry disabled: {e}");
                let snapshot = unavailable(&reason);
                self.state = GpuState::Unavailable(reason);
                return Ok(snapshot);
            }
        };
        if self.state == GpuState::Unknown {
            debug!("gpu device query succeeded");
            self.state = GpuState::Available;
        }

        let process_raw = match self.query.query("compute-apps", PROCESS_FIELDS).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("gpu process query failed: {e}");
                String::new()
            }
        };

        let gpus = parse_gpu_rows(&raw);
        let processes = parse_process_rows(&process_raw, &gpus);
        Ok(GpuSnapshot {
            timestamp_ms: now_ms(),
            available: true,
            reason: None,
            summary: Some(summarize(&gpus, &processes)),
            gpus,
            processes,
        })
    }
}
