//! framectl CLI - command-line runner for the control plane.
//!
//! Parses the process configuration inputs, wires up logging, constructs the
//! subsystem dispatcher and runs the status pollers until interrupted.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use framectl::dispatcher::SubsystemDispatcher;
use framectl::logging;
use framectl::options::{
    parse_list, ControlOptions, DEFAULT_CTRL_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

/// Interval between status summary log lines.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "framectl")]
#[command(about = "Control plane for detector frame-processing worker fleets", long_about = None)]
#[command(version)]
struct Args {
    /// Comma-separated subsystem names
    #[arg(long)]
    subsystems: String,

    /// Worker endpoints for one subsystem as NAME=HOST:PORT[,HOST:PORT...]
    /// (repeat per subsystem)
    #[arg(long = "endpoints", value_name = "NAME=ENDPOINTS")]
    endpoints: Vec<String>,

    /// Control timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CTRL_TIMEOUT_SECS)]
    ctrl_timeout: f64,

    /// Status poll interval in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: f64,

    /// Path to the worker configuration document
    #[arg(long)]
    config: PathBuf,

    /// Enable liveview control
    #[arg(long)]
    liveview: bool,
}

/// Turns parsed arguments into dispatcher options.
fn build_options(args: &Args) -> Result<ControlOptions, String> {
    let mut options = ControlOptions::new(&args.config);
    options.ctrl_timeout = Duration::from_secs_f64(args.ctrl_timeout.max(0.0));
    options.poll_interval = Duration::from_secs_f64(args.poll_interval.max(0.0));
    options.liveview = args.liveview;

    options.subsystems = parse_list(&args.subsystems);
    if options.subsystems.is_empty() {
        return Err("no subsystems specified".to_string());
    }

    for entry in &args.endpoints {
        let Some((name, endpoints)) = entry.split_once('=') else {
            return Err(format!(
                "invalid --endpoints entry '{}', expected NAME=HOST:PORT[,HOST:PORT...]",
                entry
            ));
        };
        let name = name.trim();
        if !options.subsystems.iter().any(|subsystem| subsystem == name) {
            return Err(format!("endpoints given for unknown subsystem '{}'", name));
        }
        options.endpoints.insert(name.to_string(), parse_list(endpoints));
    }

    Ok(options)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging_guard =
        match logging::init_logging(logging::default_log_dir(), logging::default_log_file()) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Failed to initialize logging: {}", e);
                process::exit(1);
            }
        };

    let options = match build_options(&args) {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(2);
        }
    };

    tracing::info!(
        version = framectl::VERSION,
        subsystems = ?options.subsystems,
        config = %options.config_path.display(),
        "framectl starting"
    );

    let dispatcher = SubsystemDispatcher::from_options(&options);
    let shutdown = CancellationToken::new();
    let pollers = dispatcher.spawn_status_pollers(&shutdown);

    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }

            _ = summary.tick() => {
                for subsystem in dispatcher.subsystems() {
                    if let Ok(status) = dispatcher.get(&format!("subsystems/{}/status", subsystem)) {
                        tracing::info!(
                            subsystem = %subsystem,
                            executing = %status["executing"],
                            frames_written = %status["frames_written"],
                            "Subsystem status"
                        );
                    }
                }
            }
        }
    }

    shutdown.cancel();
    for poller in pollers {
        let _ = poller.await;
    }
    dispatcher.close().await;
    tracing::info!("framectl stopped");
}
