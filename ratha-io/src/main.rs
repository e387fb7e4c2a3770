//! RathaIO - rover control daemon
//!
//! Reads one event per line from stdin (`forward`, `fwd_right`, `speed+`,
//! `turn_rate-`, `stop`, `brake`, `exit`, ... or a tagged
//! `direction <value>` / `command <value>` pair) and drives the vehicle.
//! Telemetry snapshots are written to the log.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use ratha_io::control::telemetry_channel;
use ratha_io::{AppConfig, CarController, ControlEvent, Error, Flow, PinRegistry, Result, Vehicle};
use std::env;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/ratha.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `ratha-io <path>` (positional)
/// - `ratha-io --config <path>` (flag-based)
/// - `ratha-io -c <path>` (short flag)
///
/// Defaults to `/etc/ratha.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    DEFAULT_CONFIG_PATH.to_string()
}

/// Missing default file means built-in wiring; a missing explicit file is an error
fn load_config(path: &str) -> Result<AppConfig> {
    if path == DEFAULT_CONFIG_PATH && !Path::new(path).exists() {
        return Ok(AppConfig::default());
    }
    AppConfig::from_file(path)
}

/// One stdin line into an event; blank lines are skipped
fn parse_line(line: &str) -> Option<Result<ControlEvent>> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    Some(match (words.next(), words.next()) {
        (None, _) => first.parse(),
        (Some(value), None) => ControlEvent::from_tagged(first, value),
        (Some(_), Some(_)) => Err(Error::InvalidArgument(format!(
            "expected '<event>' or '<tag> <value>', got '{}'",
            line.trim()
        ))),
    })
}

fn spawn_input_reader(tx: Sender<String>) -> Result<()> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("stdin read error: {}", e);
                        break;
                    }
                }
            }
            log::debug!("stdin closed");
        })
        .map_err(|e| Error::ThreadSpawn(format!("stdin reader: {e}")))?;
    Ok(())
}

fn spawn_telemetry_logger(rx: Receiver<ratha_io::Telemetry>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("telemetry-log".to_string())
        .spawn(move || {
            let mut last = None;
            for snapshot in rx {
                // Background ranging repeats mostly identical snapshots
                if last != Some(snapshot) {
                    log::info!("{}", snapshot);
                    last = Some(snapshot);
                }
            }
        })
        .map_err(|e| Error::ThreadSpawn(format!("telemetry logger: {e}")))
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = load_config(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("RathaIO v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);

    let registry = PinRegistry::from_config(&config.board)?;
    let vehicle = Vehicle::new(registry, &config);
    let (telemetry_tx, telemetry_rx) = telemetry_channel();
    let logger = spawn_telemetry_logger(telemetry_rx)?;

    let mut controller = CarController::new(vehicle, config.controller.clone(), telemetry_tx);
    controller.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::InvalidConfiguration(format!("Error setting Ctrl-C handler: {e}")))?;

    let (line_tx, line_rx) = unbounded();
    spawn_input_reader(line_tx)?;
    log::info!("RathaIO running. Type 'exit' or press Ctrl-C to stop.");

    while running.load(Ordering::Relaxed) {
        let line = match line_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("End of input");
                break;
            }
        };

        let event = match parse_line(&line) {
            None => continue,
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                log::error!("{}", e);
                continue;
            }
        };

        // Errors are already logged by the controller; the session goes on
        if let Ok(Flow::Exit) = controller.handle(event) {
            break;
        }
    }

    log::info!("Shutting down...");
    let result = controller.disconnect();
    drop(controller);
    if logger.join().is_err() {
        log::error!("Telemetry logger panicked");
    }
    result
}
