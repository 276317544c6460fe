//! Snapshot types handed to the driver.
//! These are serialized as-is into the emitted payload, so field names are the wire format.

use crate::rate::UsageMetric;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CpuSnapshot {
    pub timestamp_ms: i64,
    /// Time since the previous sample; `None` on the first call.
    pub interval_ms: Option<u64>,
    pub uptime_seconds: f64,
    pub load_average: [f64; 3],
    pub overall_percent: Option<f64>,
    pub per_core_percent: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemorySnapshot {
    pub timestamp_ms: i64,
    pub ram: Option<UsageMetric>,
    pub swap: Option<UsageMetric>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Normal,
    Warning,
    Critical,
    Unknown,
}

impl Health {
    pub fn from_used_percent(used_percent: Option<f64>) -> Self {
        match used_percent {
            Some(p) if p.is_nan() => Health::Unknown,
            Some(p) if p >= 95.0 => Health::Critical,
            Some(p) if p >= 85.0 => Health::Warning,
            Some(_) => Health::Normal,
            None => Health::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskItem {
    /// `major:minor:mountpoint`.
    pub id: String,
    pub mountpoint: String,
    pub source: String,
    pub fs_type: String,
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub used_percent: Option<f64>,
    pub read_bps: Option<f64>,
    pub write_bps: Option<f64>,
    pub health: Health,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiskSummary {
    pub mounts: usize,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
    pub read_bps: f64,
    pub write_bps: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskSnapshot {
    pub timestamp_ms: i64,
    pub summary: DiskSummary,
    pub items: Vec<DiskItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkItem {
    pub iface: String,
    /// Operational state from the link (`up`, `down`, ...), `unknown` if unreadable.
    pub state: String,
    pub speed_mbps: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_drops: u64,
    pub tx_drops: u64,
    pub rx_bps: Option<f64>,
    pub tx_bps: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NetworkSummary {
    pub interfaces: usize,
    pub rx_bps: f64,
    pub tx_bps: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkSnapshot {
    pub timestamp_ms: i64,
    pub summary: NetworkSummary,
    pub items: Vec<NetworkItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessItem {
    pub pid: u32,
    pub user: String,
    pub virt_bytes: Option<u64>,
    pub res_bytes: u64,
    pub shr_bytes: u64,
    pub cpu_percent: Option<f64>,
    /// Single-letter scheduler state (`R`, `S`, `D`, `Z`, ...).
    pub state: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProcessSummary {
    pub processes: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessSnapshot {
    pub timestamp_ms: i64,
    pub summary: ProcessSummary,
    pub items: Vec<ProcessItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GpuDevice {
    pub index: Option<u32>,
    pub uuid: Option<String>,
    pub name: String,
    pub utilization_gpu_percent: Option<f64>,
    pub memory_used_mib: Option<f64>,
    pub memory_total_mib: Option<f64>,
    pub memory_used_percent: Option<f64>,
    pub temperature_c: Option<f64>,
    pub power_draw_w: Option<f64>,
    pub power_limit_w: Option<f64>,
    pub fan_percent: Option<f64>,
    pub pstate: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GpuProcess {
    pub pid: Option<u32>,
    pub gpu_uuid: Option<String>,
    pub gpu_index: Option<u32>,
    pub gpu_name: Option<String>,
    pub used_memory_mib: Option<f64>,
    pub process_name: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GpuSummary {
    pub gpus: usize,
    pub processes: usize,
    pub total_memory_used_mib: f64,
    pub total_memory_mib: f64,
    pub average_utilization_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GpuSnapshot {
    pub timestamp_ms: i64,
    pub available: bool,
    /// Why GPU telemetry is off; shown to users verbatim.
    pub reason: Option<String>,
    pub summary: Option<GpuSummary>,
    pub gpus: Vec<GpuDevice>,
    pub processes: Vec<GpuProcess>,
}
