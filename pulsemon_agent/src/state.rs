//! Last good snapshot per metric family, kept across failed passes.

use crate::types::{Payload, TaskCounts};
use pulsemon::{
    CollectError, CpuSnapshot, DiskSnapshot, GpuSnapshot, MemorySnapshot, NetworkSnapshot,
    ProcessSnapshot,
};
use tracing::warn;

#[derive(Debug, Default)]
pub struct AgentState {
    pub hostname: String,
    pub cpu: Option<CpuSnapshot>,
    pub memory: Option<MemorySnapshot>,
    pub disk: Option<DiskSnapshot>,
    pub network: Option<NetworkSnapshot>,
    pub processes: Option<ProcessSnapshot>,
    pub gpu: Option<GpuSnapshot>,
    pub tasks: Option<TaskCounts>,
}

/// Stores `result` in `slot`, or logs and leaves the previous snapshot in place.
pub fn keep<T>(slot: &mut Option<T>, family: &'static str, result: Result<T, CollectError>) {
    match result {
        Ok(v) => *slot = Some(v),
        Err(e) => warn!(family, stale = slot.is_some(), "sample failed: {e}"),
    }
}

impl AgentState {
    pub fn new(hostname: String) -> Self {
        Self {
            hostname,
            ..Default::default()
        }
    }

    pub fn payload(&self, timestamp_ms: i64) -> Payload<'_> {
        Payload {
            timestamp_ms,
            hostname: &self.hostname,
            cpu: self.cpu.as_ref(),
            memory: self.memory.as_ref(),
            disk: self.disk.as_ref(),
            network: self.network.as_ref(),
            processes: self.processes.as_ref(),
            gpu: self.gpu.as_ref(),
            tasks: self.tasks,
        }
    }
}
