//! rwinperfd - Performance counter sampling daemon.
//!
//! Samples the requested counters on a fixed interval and prints one line per
//! object per tick, or one JSON document per object with `--json`.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(windows))]
use rwinperf::collector::{MockPdh, MockPerfData};
use rwinperf::collector::{
    BindError, BindReport, Collector, CounterPath, QuerySpec, SessionOptions, ValueMode,
    group_paths,
};
#[cfg(windows)]
use rwinperf::collector::{NativePdh, RegistryPerfData};
use rwinperf::model::CounterValues;

const DEFAULT_COUNTERS: &[&str] = &[
    "\\Processor(*)\\% Processor Time",
    "\\Memory\\Available Bytes",
    "\\System\\System Up Time",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Live query session.
    Pdh,
    /// Raw performance data from the registry.
    Perflib,
}

/// Performance counter sampling daemon.
#[derive(Parser)]
#[command(name = "rwinperfd", about = "Performance counter sampling daemon", version)]
struct Args {
    /// Counter path to sample, e.g. "\Processor(*)\% Processor Time". Repeatable.
    #[arg(short, long = "counter", value_name = "PATH")]
    counters: Vec<String>,

    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// Where counter values are read from.
    #[arg(long, value_enum, default_value = "pdh")]
    source: Source,

    /// Let the query API compute display values instead of converting raw samples.
    #[arg(long)]
    formatted: bool,

    /// Print each sample as a JSON document.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["rwinperfd", "rwinperf"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct Sample<'a> {
    timestamp: DateTime<Utc>,
    object: &'a str,
    instances: &'a CounterValues,
}

#[cfg(windows)]
fn bind_live(spec: &QuerySpec, options: &SessionOptions) -> Result<BindReport<Collector>, BindError> {
    Collector::bind(NativePdh::new(), spec, options)
}

#[cfg(not(windows))]
fn bind_live(spec: &QuerySpec, options: &SessionOptions) -> Result<BindReport<Collector>, BindError> {
    warn!("no native query API on this platform, sampling mock data");
    Collector::bind(MockPdh::typical_system(), spec, options)
}

#[cfg(windows)]
fn spawn_perflib(spec: QuerySpec) -> std::io::Result<Collector> {
    Collector::perflib(RegistryPerfData::new(), spec)
}

#[cfg(not(windows))]
fn spawn_perflib(spec: QuerySpec) -> std::io::Result<Collector> {
    warn!("no registry performance data on this platform, sampling mock data");
    Collector::perflib(MockPerfData::typical_system(), spec)
}

fn open_collectors(args: &Args, specs: Vec<QuerySpec>) -> Vec<Collector> {
    let mode = if args.formatted {
        ValueMode::Formatted
    } else {
        ValueMode::Raw
    };
    let options = SessionOptions::default().value_mode(mode);
    let mut collectors = Vec::with_capacity(specs.len());

    for spec in specs {
        let object = spec.object.clone();
        match args.source {
            Source::Pdh => match bind_live(&spec, &options) {
                Ok(report) => {
                    let (collector, failures) = report.into_parts();
                    for failure in &failures {
                        warn!(object = %object, "{}", failure);
                    }
                    info!(object = %object, skipped = failures.len(), "collector bound");
                    collectors.push(collector);
                }
                Err(e) => error!(object = %object, "failed to bind: {}", e),
            },
            Source::Perflib => match spawn_perflib(spec) {
                Ok(collector) => {
                    info!(object = %object, "perflib collector started");
                    collectors.push(collector);
                }
                Err(e) => error!(object = %object, "failed to start worker: {}", e),
            },
        }
    }
    collectors
}

fn print_values(object: &str, values: &CounterValues) {
    let fields: Vec<String> = values
        .iter()
        .flat_map(|(instance, counters)| {
            counters
                .iter()
                .map(move |(counter, value)| format!("{}:{}={}", instance, counter, value.first))
        })
        .collect();
    println!("{} {}", object, fields.join(" "));
}

fn print_json(object: &str, values: &CounterValues) {
    let sample = Sample {
        timestamp: Utc::now(),
        object,
        instances: values,
    };
    match serde_json::to_string(&sample) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(object = %object, "failed to serialize sample: {}", e),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let raw: Vec<String> = if args.counters.is_empty() {
        DEFAULT_COUNTERS.iter().map(|s| s.to_string()).collect()
    } else {
        args.counters.clone()
    };
    let mut paths = Vec::with_capacity(raw.len());
    for path in &raw {
        match CounterPath::parse(path) {
            Ok(parsed) => paths.push(parsed),
            Err(e) => {
                error!("invalid counter path: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let specs = group_paths(&paths);
    debug!(objects = specs.len(), counters = paths.len(), "counter paths grouped");

    let collectors = open_collectors(&args, specs);
    if collectors.is_empty() {
        error!("no collector could be started");
        return ExitCode::FAILURE;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let interval = Duration::from_secs(args.interval);
    let mut latest: BTreeMap<String, CounterValues> = BTreeMap::new();
    let mut tick: u64 = 0;
    info!(interval = args.interval, "Starting collection loop");

    while running.load(Ordering::SeqCst) {
        tick += 1;
        for collector in &collectors {
            let values = latest.entry(collector.name().to_string()).or_default();
            match collector.collect_into(values) {
                Ok(()) if args.json => print_json(collector.name(), values),
                Ok(()) => print_values(collector.name(), values),
                Err(e) if e.is_no_data() => {
                    debug!(object = %collector.name(), tick, "no data this cycle")
                }
                Err(e) => warn!(object = %collector.name(), tick, "collection failed: {}", e),
            }
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutting down...");
    for collector in &collectors {
        collector.close();
    }
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_counters_parse_and_group() {
        let paths: Vec<CounterPath> = DEFAULT_COUNTERS
            .iter()
            .map(|p| CounterPath::parse(p).unwrap())
            .collect();
        let specs = group_paths(&paths);
        let objects: Vec<&str> = specs.iter().map(|s| s.object.as_str()).collect();
        assert_eq!(objects, vec!["Processor", "Memory", "System"]);
        assert_eq!(specs[0].instances, vec!["*"]);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "rwinperfd",
            "--counter",
            "\\Memory\\Available Bytes",
            "-c",
            "\\System\\System Up Time",
            "--source",
            "perflib",
            "--json",
            "-vv",
        ]);
        assert_eq!(args.counters.len(), 2);
        assert_eq!(args.source, Source::Perflib);
        assert!(args.json);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.interval, 10);
    }
}
