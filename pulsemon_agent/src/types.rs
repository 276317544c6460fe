//! The per-tick payload written to stdout, one JSON object per line.

use pulsemon::{
    CpuSnapshot, DiskSnapshot, GpuSnapshot, MemorySnapshot, NetworkSnapshot, ProcessSnapshot,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub tasks: usize,
    pub threads: Option<u64>,
}

/// Families that have never produced a snapshot serialize as `null`.
#[derive(Debug, Serialize)]
pub struct Payload<'a> {
    pub timestamp_ms: i64,
    pub hostname: &'a str,
    pub cpu: Option<&'a CpuSnapshot>,
    pub memory: Option<&'a MemorySnapshot>,
    pub disk: Option<&'a DiskSnapshot>,
    pub network: Option<&'a NetworkSnapshot>,
    pub processes: Option<&'a ProcessSnapshot>,
    pub gpu: Option<&'a GpuSnapshot>,
    pub tasks: Option<TaskCounts>,
}
