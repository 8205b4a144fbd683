//! RDC Daemon - data channel dispatcher and servo controller
//!
//! This binary runs as a background daemon. Clients open channels over a
//! Unix socket; channels labelled for a servo manager drive its two PWM
//! outputs through pigpiod.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! rdcd start
//!
//! # Start the daemon (background/daemonized)
//! rdcd start -d
//!
//! # Start without hardware, logging simulated PWM calls
//! RUST_LOG=rdc_servo=debug rdcd start --simulate
//!
//! # Validate a configuration file and print the resolved settings
//! rdcd check --config ./rdcd.toml
//!
//! # Point both servos at the neutral position
//! rdcd send --label servo "90, 90"
//!
//! # Stop the daemon
//! rdcd stop
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown. Open channels are closed and every
//!   servo manager stops its PWM driver.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rdc_core::Label;
use rdc_servo::{PigpiodDriver, PwmDriver, SimulatedPwm};
use rdcd::config::{DaemonConfig, DEFAULT_SERVO_LABEL};
use rdcd::server::ChannelServer;
use rdcd::{Dispatcher, ServoManager};

type Servo = ServoManager<Box<dyn PwmDriver>>;

/// RDC daemon - label-routed data channels and servo control
#[derive(Parser, Debug)]
#[command(name = "rdcd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Record PWM calls in memory instead of talking to pigpiod
        #[arg(long)]
        simulate: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        /// Config file to report on; defaults to the one the daemon started with
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the configuration and print it
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Open a channel on the running daemon and send one message
    Send {
        /// Channel label
        #[arg(short, long, default_value = DEFAULT_SERVO_LABEL)]
        label: String,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Message payload, e.g. "90, 90"
        message: String,
    },
}

/// Returns the daemon's state directory.
fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rdc")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("rdcd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("rdcd.log")
}

/// Returns the path recording which config file the daemon was started with.
fn config_record_path() -> PathBuf {
    state_dir().join("rdcd.config")
}

/// Records the running daemon's config file next to the PID file. An empty
/// record means the built-in defaults.
fn write_config_record(record: &Path, config_path: Option<&Path>) -> Result<()> {
    let contents = config_path
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    fs::write(record, contents).context("Failed to record config path")
}

/// Config file the running daemon was started with. `Some(None)` means it
/// runs on the defaults; `None` means nothing was recorded.
fn read_config_record(record: &Path) -> Option<Option<PathBuf>> {
    let contents = fs::read_to_string(record).ok()?;
    let contents = contents.trim();
    Some((!contents.is_empty()).then(|| PathBuf::from(contents)))
}

fn remove_config_record() {
    let _ = fs::remove_file(config_record_path());
}

/// Explicit config path, or `rdc/rdcd.toml` in the user config directory
/// when that file exists.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("rdc").join("rdcd.toml"))
            .filter(|path| path.exists())
    })
}

fn load_config(explicit: Option<PathBuf>) -> Result<DaemonConfig> {
    load_resolved_config(resolve_config_path(explicit))
}

fn load_resolved_config(path: Option<PathBuf>) -> Result<DaemonConfig> {
    DaemonConfig::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load config {}", path.display()),
        None => "Invalid default configuration".to_string(),
    })
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
        simulate: false,
    });

    match command {
        Command::Start {
            daemon,
            config,
            simulate,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'rdcd stop' to stop it first.");
                process::exit(1);
            }

            // Fail before forking so configuration errors reach the terminal
            let config_path = resolve_config_path(config);
            let config = load_resolved_config(config_path.clone())?;
            // The daemon's working directory changes to / when forking
            let config_path = config_path.map(|path| fs::canonicalize(&path).unwrap_or(path));

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            if let Err(e) = write_config_record(&config_record_path(), config_path.as_deref()) {
                warn!(error = %e, "Status will fall back to the default config");
            }
            let result = run_daemon(config, simulate);
            remove_config_record();
            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status { config } => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = match (config, read_config_record(&config_record_path())) {
                    (Some(explicit), _) => load_resolved_config(Some(explicit))?,
                    (None, Some(recorded)) => load_resolved_config(recorded)?,
                    (None, None) => load_config(None)?,
                };
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
                for entry in &config.servos {
                    println!("Servo: {} (pins {}, {})", entry.label, entry.servo.x.pin, entry.servo.y.pin);
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
        Command::Check { config } => {
            let config = load_config(config)?;
            let rendered = config
                .to_toml_string()
                .context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
        Command::Send {
            label,
            config,
            message,
        } => {
            let label = Label::parse(label).context("Invalid label")?;
            let frame = channel_frame(&label, &message)?;
            let config = load_config(config)?;
            send_message(&config.socket_path, &label, &frame)
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig, simulate: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rdcd=info".parse()?)
                .add_directive("rdc_core=info".parse()?)
                .add_directive("rdc_protocol=info".parse()?)
                .add_directive("rdc_servo=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        simulate,
        "RDC daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let dispatcher = Arc::new(Dispatcher::new());
    let servos = start_servos(&config, simulate, &dispatcher)?;
    info!(managers = servos.len(), labels = ?dispatcher.labels(), "Servo managers registered");

    let server = ChannelServer::new(&config.socket_path, Arc::clone(&dispatcher), cancel_token);
    let result = server.run().await;

    // Dropping the managers releases their handlers and stops the drivers
    drop(servos);

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("RDC daemon stopped");
    Ok(())
}

/// Creates one servo manager per configured entry and registers it.
///
/// A manager whose hardware fails to initialize is skipped; the daemon only
/// gives up when none could be created.
fn start_servos(config: &DaemonConfig, simulate: bool, dispatcher: &Dispatcher) -> Result<Vec<Arc<Servo>>> {
    let mut servos = Vec::with_capacity(config.servos.len());

    for entry in &config.servos {
        let driver: Box<dyn PwmDriver> = if simulate {
            Box::new(SimulatedPwm::new())
        } else {
            match PigpiodDriver::connect(&config.pigpiod.host, config.pigpiod.port) {
                Ok(driver) => Box::new(driver),
                Err(e) => {
                    error!(label = %entry.label, error = %e, "Failed to connect servo driver");
                    continue;
                }
            }
        };

        match ServoManager::create(entry.label.clone(), entry.servo.clone(), driver) {
            Ok(servo) => {
                dispatcher.add(&servo);
                servos.push(servo);
            }
            Err(e) => error!(label = %entry.label, error = %e, "Failed to initialize servo manager"),
        }
    }

    if servos.is_empty() {
        bail!("No servo manager could be initialized");
    }
    if servos.len() < config.servos.len() {
        warn!(
            started = servos.len(),
            configured = config.servos.len(),
            "Some servo managers failed to start"
        );
    }
    Ok(servos)
}

/// Builds the bytes that open `label` and carry `message` as its one line.
///
/// A line break inside `message` would split it into several messages, so it
/// is rejected.
fn channel_frame(label: &Label, message: &str) -> Result<String> {
    if message.contains(['\n', '\r']) {
        bail!("Message must be a single line");
    }
    Ok(format!("{label}\n{message}\n"))
}

/// Opens a channel on the running daemon, writes `frame` and closes it.
#[tokio::main(flavor = "current_thread")]
async fn send_message(socket_path: &Path, label: &Label, frame: &str) -> Result<()> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;

    stream
        .write_all(frame.as_bytes())
        .await
        .context("Failed to send message")?;
    stream.shutdown().await.context("Failed to close channel")?;

    println!("Sent to '{label}': {}", frame.lines().nth(1).unwrap_or_default());
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_frame_is_label_then_message() {
        let label = Label::parse("servo").unwrap();
        assert_eq!(channel_frame(&label, "90, 90").unwrap(), "servo\n90, 90\n");
    }

    #[test]
    fn test_channel_frame_rejects_embedded_newline() {
        let label = Label::parse("servo").unwrap();
        assert!(channel_frame(&label, "90, 90\n0, 0").is_err());
        assert!(channel_frame(&label, "90, 90\r").is_err());
    }

    #[test]
    fn test_config_record_names_started_config() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("rdcd.config");
        let started = dir.path().join("custom.toml");

        assert_eq!(read_config_record(&record), None);

        write_config_record(&record, Some(&started)).unwrap();
        assert_eq!(read_config_record(&record), Some(Some(started)));

        write_config_record(&record, None).unwrap();
        assert_eq!(read_config_record(&record), Some(None));
    }

    #[test]
    fn test_status_prefers_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdcd.toml");
        fs::write(&path, "socket_path = \"/tmp/custom.sock\"\n").unwrap();

        let config = load_resolved_config(Some(path)).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
    }
}
