//! pvbench - PV runtime measurement.
//!
//! Subscribes to a set of process variables over `ca` or `pva` and measures
//! latency, throughput, loss, resilience under load, or concurrent-client
//! behavior. Results go to CSV files under the results directory.

mod sink;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pvbench::backend::{SimConfig, SimulatedBackend};
use pvbench::config::BenchConfig;
use pvbench::harness::ConcurrentHarness;
use pvbench::metrics::{LatencyRow, LossRow, ThroughputRow};
use pvbench::rows::{Row, RowSink};
use pvbench::sampler::{ProcProbe, RealFs};
use pvbench::scenario;
use pvbench::stress::StressController;
use pvbench::subscription::BackendRegistry;
use pvbench::util::{StopSignal, format_bytes};

use sink::CsvSink;

/// PV runtime measurement over Channel Access or PV Access.
#[derive(Parser)]
#[command(name = "pvbench", about = "PV runtime measurement", version)]
struct Args {
    /// JSON configuration file. Every field is optional.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Protocol: ca or pva (overrides the config file).
    #[arg(short, long)]
    protocol: Option<String>,

    /// Use the in-process simulated source for both protocols.
    #[arg(long)]
    simulate: bool,

    /// Simulated updates per second per PV.
    #[arg(long, default_value = "20")]
    sim_rate: f64,

    /// Simulated frame size in 16-bit elements.
    #[arg(long, default_value = "4096")]
    sim_elements: usize,

    /// Skip every n-th simulated frame.
    #[arg(long, value_name = "N")]
    sim_drop_every: Option<u64>,

    /// Results directory (overrides the config file).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inter-arrival interval per PV.
    Latency {
        /// Run for this many seconds instead of until Ctrl-C.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Byte rate per PV over tumbling windows.
    Throughput {
        /// Window length in seconds.
        #[arg(long)]
        interval: Option<f64>,
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Gap-based missing-frame estimate.
    Loss {
        /// Assumed average interval between updates, in seconds.
        #[arg(long)]
        avg_dt: Option<f64>,
        /// Reporting interval in seconds.
        #[arg(long)]
        report_interval: Option<f64>,
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Single high-load run with resource sampling.
    Stress {
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Many independent clients in parallel.
    Concurrent {
        #[arg(long)]
        clients: Option<usize>,
        /// PVs per client (0 = all PVs per client).
        #[arg(long)]
        pv_per_client: Option<usize>,
        #[arg(long)]
        duration: Option<f64>,
    },
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
    if let Ok(directive) = format!("pvbench={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut BenchConfig, args: &Args) {
    if let Some(protocol) = &args.protocol {
        config.protocol = protocol.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.results_dir = dir.clone();
    }
    match &args.command {
        Command::Latency { duration } => {
            config.latency.duration_secs = duration.or(config.latency.duration_secs);
        }
        Command::Throughput { interval, duration } => {
            if let Some(interval) = interval {
                config.throughput.window_secs = *interval;
            }
            config.throughput.duration_secs = duration.or(config.throughput.duration_secs);
        }
        Command::Loss {
            avg_dt,
            report_interval,
            duration,
        } => {
            if let Some(avg_dt) = avg_dt {
                config.loss.avg_interval_secs = *avg_dt;
            }
            if let Some(report_interval) = report_interval {
                config.loss.report_interval_secs = *report_interval;
            }
            config.loss.duration_secs = duration.or(config.loss.duration_secs);
        }
        Command::Stress { duration } => {
            if let Some(duration) = duration {
                config.stress.duration_secs = *duration;
            }
        }
        Command::Concurrent {
            clients,
            pv_per_client,
            duration,
        } => {
            if let Some(clients) = clients {
                config.concurrent.clients = *clients;
            }
            if let Some(n) = pv_per_client {
                config.concurrent.pvs_per_client = *n;
            }
            if let Some(duration) = duration {
                config.concurrent.duration_secs = *duration;
            }
        }
    }
}

/// Backends available to this build. Without `--simulate` no protocol
/// library is linked, so every run fails with "backend not available".
fn build_registry(args: &Args) -> BackendRegistry {
    if !args.simulate {
        return BackendRegistry::new();
    }
    let backend = Arc::new(SimulatedBackend::new(SimConfig {
        rate_hz: args.sim_rate,
        elements: args.sim_elements,
        drop_every: args.sim_drop_every,
    }));
    info!(
        "Simulated source: {} Hz, {} per frame",
        args.sim_rate,
        format_bytes(args.sim_elements as u64 * 2)
    );
    BackendRegistry::new()
        .with_ca(backend.clone())
        .with_pva(backend)
}

fn csv_sink<R: Row>(dir: &Path, name: &str) -> io::Result<CsvSink<R, fs::File>> {
    let path = dir.join(name);
    debug!("Writing {}", path.display());
    CsvSink::create(&path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

fn write_rows<R: Row>(dir: &Path, name: &str, rows: &[R]) -> Result<(), String> {
    csv_sink::<R>(dir, name)
        .and_then(|mut sink| {
            sink.emit_all(rows)?;
            sink.flush()
        })
        .map_err(|e| format!("cannot write {}: {}", name, e))?;
    info!("Saved {} rows to {}", rows.len(), dir.join(name).display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to serialize summary: {}", e),
    }
}

fn run(args: &Args, config: &BenchConfig, stop: &StopSignal) -> Result<(), String> {
    let registry = build_registry(args);
    let pvs = config.pv_names();
    let dir = config.results_dir.as_path();
    fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;

    match &args.command {
        Command::Latency { .. } => {
            let options = config.latency_options().map_err(|e| e.to_string())?;
            let (outcome, _) = scenario::run_latency(&registry, &pvs, options, stop, || {
                csv_sink::<LatencyRow>(dir, "latency.csv")
            })
            .map_err(|e| e.to_string())?;
            info!("Latency monitor wrote {} rows", outcome.rows);
            if args.json {
                print_json(&outcome);
            }
        }
        Command::Throughput { .. } => {
            let options = config.throughput_options().map_err(|e| e.to_string())?;
            let (outcome, _) = scenario::run_throughput(&registry, &pvs, options, stop, || {
                csv_sink::<ThroughputRow>(dir, "throughput.csv")
            })
            .map_err(|e| e.to_string())?;
            info!("Throughput monitor wrote {} windows", outcome.ticks);
            if args.json {
                print_json(&outcome);
            }
        }
        Command::Loss { .. } => {
            let (options, assumed) = config.loss_options().map_err(|e| e.to_string())?;
            let (outcome, _) = scenario::run_loss(&registry, &pvs, assumed, options, stop, || {
                csv_sink::<LossRow>(dir, "packetloss.csv")
            })
            .map_err(|e| e.to_string())?;
            info!("Packet loss monitor wrote {} rows", outcome.rows);
            if args.json {
                print_json(&outcome);
            }
        }
        Command::Stress { .. } => {
            let stress = config.stress_config().map_err(|e| e.to_string())?;
            let controller = StressController::new(registry, stress);
            let report = controller
                .run(&pvs, ProcProbe::new(RealFs::new()), stop)
                .map_err(|e| e.to_string())?;
            write_rows(dir, "stress_test.csv", &report.stats.rows())?;
            write_rows(dir, "stress_cpu.csv", &report.samples)?;
            info!(
                "Stress run: {} updates, {:.2} Hz, {:.3} MB/s",
                report.stats.total_updates,
                report.stats.avg_update_rate,
                report.stats.avg_throughput_mbps
            );
            if args.json {
                print_json(&report.stats);
            }
        }
        Command::Concurrent { .. } => {
            let harness_config = config.harness_config().map_err(|e| e.to_string())?;
            let harness = ConcurrentHarness::new(registry, harness_config);
            let report = harness.run(&pvs, stop).map_err(|e| e.to_string())?;
            for failure in &report.failures {
                warn!("Client {} failed: {}", failure.client_id, failure.error);
            }
            write_rows(dir, "concurrent_test.csv", &report.clients)?;
            write_rows(dir, "concurrent_detail.csv", &report.details)?;
            let summary = report.summary();
            info!(
                "Concurrent run: {} clients ok, {} failed, {} updates, {:.2} Hz mean",
                summary.clients_completed,
                summary.clients_failed,
                summary.total_updates,
                summary.mean_rate_hz
            );
            if args.json {
                print_json(&summary);
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path).unwrap_or_else(|e| {
            error!("{}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => BenchConfig::default(),
    };
    apply_overrides(&mut config, &args);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("pvbench {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: protocol={}, pvs={}, output={}",
        config.protocol,
        config.pvs.len(),
        config.results_dir.display()
    );

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_stop.trigger();
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    if let Err(e) = run(&args, &config, &stop) {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn overrides_replace_config_values() {
        let args = parse(&[
            "pvbench", "--protocol", "pva", "-o", "/tmp/r", "loss", "--avg-dt", "0.1",
            "--report-interval", "2",
        ]);
        let mut config = BenchConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.protocol, "pva");
        assert_eq!(config.results_dir, PathBuf::from("/tmp/r"));
        assert_eq!(config.loss.avg_interval_secs, 0.1);
        assert_eq!(config.loss.report_interval_secs, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn concurrent_flags() {
        let args = parse(&["pvbench", "concurrent", "--clients", "3", "--pv-per-client", "1"]);
        let mut config = BenchConfig::default();
        apply_overrides(&mut config, &args);
        let harness = config.harness_config().unwrap();
        assert_eq!(harness.client_count, 3);
        assert_eq!(harness.pvs_per_client, 1);
    }

    #[test]
    fn registry_is_empty_without_simulation() {
        use pvbench::subscription::BackendKind;

        let args = parse(&["pvbench", "stress"]);
        assert!(!build_registry(&args).is_available(BackendKind::Ca));
        let args = parse(&["pvbench", "--simulate", "stress"]);
        let registry = build_registry(&args);
        assert!(registry.is_available(BackendKind::Ca));
        assert!(registry.is_available(BackendKind::Pva));
    }

    #[test]
    fn simulated_concurrent_run_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_string_lossy().to_string();
        let args = parse(&[
            "pvbench", "--simulate", "--sim-rate", "200", "--sim-elements", "8", "-o", &out,
            "concurrent", "--clients", "2", "--duration", "0.1",
        ]);
        let mut config = BenchConfig::default();
        apply_overrides(&mut config, &args);

        run(&args, &config, &StopSignal::new()).unwrap();

        let stats = fs::read_to_string(dir.path().join("concurrent_test.csv")).unwrap();
        assert!(stats.starts_with("client_id,data_count,elapsed_time,avg_rate_hz\n"));
        assert_eq!(stats.lines().count(), 3);
        assert!(dir.path().join("concurrent_detail.csv").exists());
    }

    #[test]
    fn failed_start_keeps_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let previous = "pv,frame_interval_sec\nA:1,0.5\nA:1,0.25\n";
        fs::write(dir.path().join("latency.csv"), previous).unwrap();
        let out = dir.path().to_string_lossy().to_string();
        let args = parse(&["pvbench", "-o", &out, "latency", "--duration", "0.1"]);
        let mut config = BenchConfig::default();
        apply_overrides(&mut config, &args);

        let err = run(&args, &config, &StopSignal::new()).unwrap_err();

        assert!(err.contains("not available"), "{}", err);
        let after = fs::read_to_string(dir.path().join("latency.csv")).unwrap();
        assert_eq!(after, previous);
        assert!(!dir.path().join("throughput.csv").exists());
    }

    #[test]
    fn simulated_latency_run_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_string_lossy().to_string();
        let args = parse(&[
            "pvbench", "--simulate", "--sim-rate", "200", "--sim-elements", "8", "-o", &out,
            "latency", "--duration", "0.2",
        ]);
        let mut config = BenchConfig::default();
        apply_overrides(&mut config, &args);

        run(&args, &config, &StopSignal::new()).unwrap();

        let content = fs::read_to_string(dir.path().join("latency.csv")).unwrap();
        assert!(content.starts_with("pv,frame_interval_sec\n"));
        assert!(content.lines().count() > 1);
    }
}
