//! Host metrics sampling from kernel counters.
//!
//! Each collector owns whatever previous-sample state it needs to turn cumulative
//! counters into rates, plus caches for slow-changing metadata. Callers drive them
//! with [`Collector::sample`] on a fixed period and get back plain snapshot values.
//!
//! ```no_run
//! use pulsemon::{Collector, CpuCollector, CpuConfig, RealFs};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), pulsemon::CollectError> {
//! let mut cpu = CpuCollector::new(Arc::new(RealFs::new()), CpuConfig::default());
//! let _first = cpu.sample().await?; // percentages are None until a second sample
//! let snap = cpu.sample().await?;
//! println!("{:?}", snap.overall_percent);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod fs;
pub mod gpu;
pub mod memory;
pub mod network;
pub mod policy;
pub mod process;
pub mod procfs;
pub mod rate;
pub mod types;

use std::future::Future;
use std::time::Instant;

pub use cache::Cached;
pub use cpu::{CpuCollector, CpuConfig};
pub use disk::{DiskCollector, DiskConfig};
pub use error::CollectError;
pub use fs::{FileSystem, FsCapacity, MockFs, RealFs};
pub use gpu::{DeviceQuery, GpuCollector, GpuConfig, GpuState, NvidiaSmi, QueryError};
pub use memory::{MemoryCollector, MemoryConfig};
pub use network::{NetworkCollector, NetworkConfig};
pub use policy::{InterfacePolicy, MountPolicy};
pub use process::{ProcessCollector, ProcessConfig};
pub use rate::{CounterSample, UsageMetric};
pub use types::*;

/// A stateful sampler of one metric family.
///
/// `sample_at` mutates previous-sample state, so calls on one instance must be serialized.
pub trait Collector {
    type Snapshot;

    /// Samples as of `now`; rates are computed against the previous call's `now`.
    fn sample_at(
        &mut self,
        now: Instant,
    ) -> impl Future<Output = Result<Self::Snapshot, CollectError>> + Send;

    fn sample(&mut self) -> impl Future<Output = Result<Self::Snapshot, CollectError>> + Send {
        self.sample_at(Instant::now())
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
