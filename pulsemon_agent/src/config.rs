//! Agent settings: command-line flags layered over `PULSEMON_*` environment defaults.

use once_cell::sync::OnceCell;
use std::time::Duration;

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const MIN_INTERVAL_MS: u64 = 250;

/// Flags given on the command line; `None` defers to the environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub interval_ms: Option<u64>,
    pub once: bool,
    pub no_gpu: bool,
    pub no_processes: bool,
}

/// Environment defaults (read once).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDefaults {
    pub interval_ms: Option<u64>,
    pub gpu: bool,
    pub processes: bool,
    pub proc_concurrency: Option<usize>,
}

impl Default for EnvDefaults {
    fn default() -> Self {
        Self {
            interval_ms: None,
            gpu: true,
            processes: true,
            proc_concurrency: None,
        }
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v != "0").unwrap_or(true)
}

impl EnvDefaults {
    pub fn get() -> &'static EnvDefaults {
        static ENV: OnceCell<EnvDefaults> = OnceCell::new();
        ENV.get_or_init(|| EnvDefaults {
            interval_ms: std::env::var("PULSEMON_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            gpu: flag("PULSEMON_GPU"),
            processes: flag("PULSEMON_PROCESSES"),
            proc_concurrency: std::env::var("PULSEMON_PROC_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub interval: Duration,
    pub once: bool,
    pub gpu: bool,
    pub processes: bool,
    pub proc_concurrency: Option<usize>,
}

impl AgentConfig {
    pub fn resolve(args: &ParsedArgs, env: &EnvDefaults) -> Self {
        let interval_ms = args
            .interval_ms
            .or(env.interval_ms)
            .unwrap_or(DEFAULT_INTERVAL_MS)
            .max(MIN_INTERVAL_MS);
        Self {
            interval: Duration::from_millis(interval_ms),
            once: args.once,
            gpu: env.gpu && !args.no_gpu,
            processes: env.processes && !args.no_processes,
            proc_concurrency: env.proc_concurrency,
        }
    }
}
