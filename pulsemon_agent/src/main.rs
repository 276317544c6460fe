//! Entry point for pulsemon_agent. Parses args, then samples host metrics on a fixed
//! period and prints one JSON payload per line to stdout. Logs go to stderr.

mod config;
mod host;
mod sampler;
mod state;
mod types;

use config::{AgentConfig, EnvDefaults, ParsedArgs};
use sampler::Sampler;
use std::env;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "Usage: {prog} [--interval MS|-i MS] [--once] [--no-gpu] [--no-processes] [--help|-h]";

#[derive(Debug)]
enum ArgsError {
    Help(String),
    Invalid(String),
}

fn usage(prog: &str) -> String {
    USAGE.replace("{prog}", prog)
}

fn parse_interval(prog: &str, v: Option<String>) -> Result<u64, ArgsError> {
    let v = v.ok_or_else(|| ArgsError::Invalid(format!("missing value for --interval\n{}", usage(prog))))?;
    v.parse::<u64>()
        .map_err(|_| ArgsError::Invalid(format!("invalid interval '{v}'\n{}", usage(prog))))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, ArgsError> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "pulsemon_agent".into());
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(ArgsError::Help(usage(&prog))),
            "--interval" | "-i" => {
                parsed.interval_ms = Some(parse_interval(&prog, it.next())?);
            }
            "--once" => parsed.once = true,
            "--no-gpu" => parsed.no_gpu = true,
            "--no-processes" => parsed.no_processes = true,
            _ if arg.starts_with("--interval=") => {
                let v = arg.split_once('=').map(|(_, v)| v.to_string());
                parsed.interval_ms = Some(parse_interval(&prog, v)?);
            }
            _ => {
                return Err(ArgsError::Invalid(format!(
                    "unexpected argument '{arg}'\n{}",
                    usage(&prog)
                )))
            }
        }
    }
    Ok(parsed)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(ArgsError::Help(msg)) => {
            println!("{msg}");
            return Ok(ExitCode::SUCCESS);
        }
        Err(ArgsError::Invalid(msg)) => {
            eprintln!("{msg}");
            return Ok(ExitCode::from(2));
        }
    };
    init_tracing();

    let config = AgentConfig::resolve(&parsed, EnvDefaults::get());
    info!(
        interval_ms = config.interval.as_millis() as u64,
        gpu = config.gpu,
        processes = config.processes,
        "pulsemon agent starting"
    );

    let mut sampler = Sampler::new(&config, hostname());
    if config.once {
        sampler::run_once(&mut sampler, config.interval).await?;
    } else {
        sampler::run(sampler, config.interval).await?;
    }
    Ok(ExitCode::SUCCESS)
}
