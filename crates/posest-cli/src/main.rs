//! `posest` – position/speed estimator command line.
//!
//! - `posest run [--ticks N] [--sim]` – run the estimator at the configured
//!   rate.  `--sim` attaches simulated GPS, barometer and sonar drivers.
//!   Ctrl-C stops the loop and prints the final estimate.
//! - `posest config` – print the effective configuration (file plus
//!   `POSEST_*` overrides).
//! - `posest init` – write a default `~/.posest/config.toml`.

mod config;
mod reload;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use posest_filter::NoiseParameterStore;
use posest_middleware::{SampleBus, SimRangeFinder, SimTrajectory, SonarEmitter};
use posest_runtime::{EstimatorService, EstimatorSettings, init_tracing};
use posest_types::Channel;

use crate::config::Config;
use crate::reload::ConfigWatcher;

const RELOAD_PERIOD: Duration = Duration::from_millis(500);
const SIM_SENSOR_PERIOD: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "posest", version, about = "Kalman position and speed estimator")]
struct Cli {
    /// Config file (default `~/.posest/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the estimator loop.
    Run {
        /// Stop after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,

        /// Feed the estimator from simulated sensors.
        #[arg(long)]
        sim: bool,
    },
    /// Print the effective configuration.
    Config,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("posest");
    let path = cli.config.unwrap_or_else(config::config_path);

    let result = match cli.command {
        Command::Run { ticks, sim } => run(&path, ticks, sim),
        Command::Config => show_config(&path),
        Command::Init { force } => init_config(&path, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn run(path: &Path, ticks: Option<u64>, sim: bool) -> Result<(), String> {
    let cfg = config::load_or_default(path).map_err(|e| e.to_string())?;
    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping estimator …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::Release);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    runtime.block_on(run_estimator(path.to_path_buf(), cfg, ticks, sim, shutdown))
}

async fn run_estimator(
    path: PathBuf,
    cfg: Config,
    ticks: Option<u64>,
    sim: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<(), String> {
    let params = Arc::new(NoiseParameterStore::new(&cfg.noise));
    let bus = SampleBus::default();
    let settings = EstimatorSettings {
        ultra_outlier_ratio: cfg.estimator.ultra_outlier_ratio,
        sonar: cfg.sonar,
        ..EstimatorSettings::default()
    };
    let mut service =
        EstimatorService::new(params.clone(), bus.clone(), settings).map_err(|e| e.to_string())?;

    // Separate stop flag: a tick limit must end the background tasks too.
    let tasks_stop = Arc::new(AtomicBool::new(false));
    let mut tasks = Vec::new();

    let watcher = ConfigWatcher::new(path, params).mark_current();
    tasks.push(tokio::spawn(watcher.watch(RELOAD_PERIOD, tasks_stop.clone())));

    if sim {
        let trajectory = SimTrajectory::new(1.0, 0.5, 0.2).with_start_altitude(1.0);
        tasks.push(tokio::spawn(trajectory.drive(
            bus.clone(),
            SIM_SENSOR_PERIOD,
            tasks_stop.clone(),
        )));
        let emitter = SonarEmitter::new(
            Box::new(SimRangeFinder::new(trajectory, cfg.sonar.down_index)),
            bus.clone(),
            cfg.sonar,
        );
        let stop = tasks_stop.clone();
        tasks.push(tokio::spawn(async move {
            emitter.run(stop).await;
        }));
        info!("simulated sensors attached");
    } else {
        warn!("no sensor drivers attached; estimates will stay at rest");
    }

    let period = cfg.estimator.tick_period();
    println!(
        "  Estimating at {} Hz{} – press {} to stop.\n",
        cfg.estimator.tick_hz.max(1).to_string().bold(),
        ticks.map(|n| format!(" for {} ticks", n)).unwrap_or_default(),
        "Ctrl-C".bold()
    );
    let ran = service.run(period, shutdown, ticks).await;

    tasks_stop.store(true, Ordering::Release);
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }

    print_estimate(ran, &service);
    Ok(())
}

fn show_config(path: &Path) -> Result<(), String> {
    let cfg = config::load_or_default(path).map_err(|e| e.to_string())?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "defaults (no file)".to_string()
    };
    println!("  Config: {}\n", source.bold());
    let raw =
        toml::to_string_pretty(&cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    println!("{}", raw);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&Config::default(), path).map_err(|e| e.to_string())?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "posest".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Kalman position/speed estimator");
    println!();
}

fn print_estimate(ticks: u64, service: &EstimatorService) {
    let est = service.estimate();
    println!();
    println!("  {} after {} ticks", "Estimate".bold(), ticks);
    let rows = [
        ("north", est.ne_pos.n, est.ne_speed.n),
        ("east", est.ne_pos.e, est.ne_speed.e),
        ("baro up", est.baro_u.pos, est.baro_u.speed),
        ("ultra up", est.ultra_u.pos, est.ultra_u.speed),
    ];
    for (label, pos, speed) in rows {
        println!("    {label:<8} pos {pos:>9.3} m   speed {speed:>7.3} m/s");
    }

    let faults: Vec<String> = Channel::ALL
        .into_iter()
        .filter_map(|ch| {
            let n = service.fault_count(ch);
            (n > 0).then(|| format!("{ch}={n}"))
        })
        .collect();
    if faults.is_empty() {
        println!("    {}", "no skipped corrections".green());
    } else {
        println!("    {} {}", "skipped corrections:".yellow(), faults.join(", "));
    }
    if service.dropped_samples() > 0 {
        println!("    {} {}", "dropped samples:".yellow(), service.dropped_samples());
    }
    println!();
}
