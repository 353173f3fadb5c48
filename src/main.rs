//! airlogger CLI
//!
//! Samples GPS, environment and system-health sources and logs one row per
//! tick to a per-session CSV file.

use airlogger::{
    config::{BackendConfig, Config},
    create_shared_stats_with_persistence,
    session::{ControlEvent, SessionController, SessionState},
    SessionStats, SourceKind, VERSION,
};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airlogger")]
#[command(version = VERSION)]
#[command(about = "Multi-source GPS, environment and system-health logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger, reading control commands from stdin
    Run {
        /// Use simulated sources instead of the configured backends
        #[arg(long)]
        simulate: bool,

        /// Start a session immediately
        #[arg(long)]
        autostart: bool,

        /// Directory for session logs (overrides the config file)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Aggregator tick in milliseconds (overrides the config file)
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Do not print the live summary line
        #[arg(long)]
        quiet: bool,
    },

    /// Hold the running logger's session paused
    Pause,

    /// Let the running logger's session collect again
    Resume,

    /// Show configuration and cumulative statistics
    Status {
        /// Clear the cumulative statistics first
        #[arg(long)]
        reset: bool,
    },

    /// Show configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },

    /// Run the logger with an HTTP control surface
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (0 for random)
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Use simulated sources instead of the configured backends
        #[arg(long)]
        simulate: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            simulate,
            autostart,
            log_dir,
            tick_ms,
            quiet,
        } => {
            init_tracing(quiet);
            cmd_run(simulate, autostart, log_dir, tick_ms, quiet);
        }
        Commands::Pause => {
            cmd_pause();
        }
        Commands::Resume => {
            cmd_resume();
        }
        Commands::Status { reset } => {
            cmd_status(reset);
        }
        Commands::Config { init } => {
            cmd_config(init);
        }
        #[cfg(feature = "server")]
        Commands::Serve { port, simulate } => {
            init_tracing(false);
            cmd_serve(port, simulate);
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file, exiting on a malformed one.
fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config {:?}: {e}", Config::config_path());
            std::process::exit(1);
        }
    }
}

/// Build a controller, exiting if the configuration is unusable.
fn build_controller(config: Config, simulate: bool) -> Arc<SessionController> {
    let config = if simulate { config.simulated() } else { config };
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.data_path.join("stats.json"));
    match SessionController::from_config(config, stats) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn print_sources(config: &Config) {
    for kind in SourceKind::ALL {
        let settings = config.sources.get(kind);
        let backend = match &settings.backend {
            BackendConfig::Gpsd { host, port, .. } => format!("gpsd at {host}:{port}"),
            BackendConfig::Command { program, .. } => format!("command `{program}`"),
            BackendConfig::Vcgencmd { program } => format!("vcgencmd `{program}`"),
            BackendConfig::Simulated => "simulated".to_string(),
        };
        println!(
            "  {:<12} {} (every {}ms, timeout {}ms)",
            format!("{kind}:"),
            backend,
            settings.interval.as_millis(),
            settings.timeout.as_millis()
        );
    }
}

fn cmd_run(
    simulate: bool,
    autostart: bool,
    log_dir: Option<PathBuf>,
    tick_ms: Option<u64>,
    quiet: bool,
) {
    println!("airlogger v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(dir) = log_dir {
        config.log_dir = dir;
    }
    if let Some(ms) = tick_ms {
        config.tick_interval = Duration::from_millis(ms);
    }

    let controller = build_controller(config, simulate);
    let config = controller.config().clone();

    println!("Sources:");
    print_sources(&config);
    println!("  Tick: {}ms", config.tick_interval.as_millis());
    println!("  Logs: {:?}", config.log_dir);
    println!();
    println!("Commands: start, pause, resume, stop, status, quit");
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let commands = stdin_commands();

    // Support pause/resume from another process by polling the config file.
    let mut paused = config.paused;
    let mut last_config_check = Instant::now();
    let mut last_display = Instant::now();
    let mut last_tick = 0u64;
    let mut reported_fault: Option<String> = None;

    if autostart {
        apply(&controller, ControlEvent::Start);
        sync_pause_flag(&controller, paused);
    }

    while running.load(Ordering::SeqCst) {
        match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if !handle_command(&controller, line.trim(), paused) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed; keep running until Ctrl+C
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(100)),
        }

        // Periodically reload config so `airlogger pause/resume` can control a running logger.
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    sync_pause_flag(&controller, paused);
                }
            }
            last_config_check = Instant::now();
        }

        if let Some(fault) = controller.fault() {
            if reported_fault.as_deref() != Some(fault.as_str()) {
                eprintln!("Session ended: {fault}");
                reported_fault = Some(fault);
            }
        }

        if !quiet && last_display.elapsed() >= Duration::from_secs(1) {
            if let Some(record) = controller.latest_record() {
                let state = controller.state();
                let active = matches!(state, SessionState::Collecting | SessionState::Paused);
                if active && record.tick != last_tick {
                    let marker = if state == SessionState::Paused {
                        " (paused)"
                    } else {
                        ""
                    };
                    println!("{}{marker}", record.summary_line());
                    last_tick = record.tick;
                }
            }
            last_display = Instant::now();
        }
    }

    println!();
    if matches!(
        controller.state(),
        SessionState::Collecting | SessionState::Paused
    ) {
        println!("Stopping session...");
        apply(&controller, ControlEvent::Stop);
    }

    if let Err(e) = controller.stats().save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    // Final stats
    println!();
    println!("{}", controller.stats().summary());
}

/// The event that brings a session in line with the persisted pause flag.
fn pause_flag_event(state: SessionState, paused: bool) -> Option<ControlEvent> {
    match (state, paused) {
        (SessionState::Collecting, true) => Some(ControlEvent::Pause),
        (SessionState::Paused, false) => Some(ControlEvent::Resume),
        _ => None,
    }
}

fn sync_pause_flag(controller: &SessionController, paused: bool) {
    if let Some(event) = pause_flag_event(controller.state(), paused) {
        apply(controller, event);
        if event == ControlEvent::Pause {
            println!("Session is held paused.");
            println!("Run `airlogger resume` to start writing rows.");
            println!();
        }
    }
}

/// Handle one stdin line. Returns `false` when the user asked to quit.
///
/// A session started here honors the persisted pause flag.
fn handle_command(controller: &SessionController, line: &str, paused: bool) -> bool {
    match line {
        "" => {}
        "quit" | "exit" | "q" => return false,
        "status" => print_status(controller),
        other => match other.parse::<ControlEvent>() {
            Ok(event) => {
                apply(controller, event);
                if event == ControlEvent::Start {
                    sync_pause_flag(controller, paused);
                }
            }
            Err(e) => {
                eprintln!("{e}");
                eprintln!("Commands: start, pause, resume, stop, status, quit");
            }
        },
    }
    true
}

fn apply(controller: &SessionController, event: ControlEvent) {
    match controller.handle(event) {
        Ok(transition) if transition.is_applied() => {
            println!("Session {}", controller.state());
            if event == ControlEvent::Start {
                if let Some(path) = controller.status().log_path {
                    println!("Logging to {path:?}");
                }
            }
        }
        Ok(_) => {
            println!(
                "Ignored '{event}' while {}",
                controller.state()
            );
        }
        Err(e) => {
            eprintln!("Could not {event}: {e}");
        }
    }
}

fn print_status(controller: &SessionController) {
    let status = controller.status();
    println!("State: {}", status.state);
    if let Some(id) = status.session_id {
        println!("Session: {id}");
    }
    if let Some(path) = &status.log_path {
        println!("Log file: {path:?}");
    }
    println!(
        "Ticks: {} ({} written, {} withheld while paused)",
        status.ticks, status.records_written, status.records_withheld
    );
    for source in &status.sources {
        let availability = if source.available {
            "available".to_string()
        } else {
            match &source.last_error {
                Some(e) => format!("unavailable ({e})"),
                None => "unavailable".to_string(),
            }
        };
        println!("  {:<12} {}", format!("{}:", source.source), availability);
    }
    if let Some(fault) = &status.fault {
        println!("Fault: {fault}");
    }
}

/// Forward stdin lines over a channel so the main loop never blocks on input.
fn stdin_commands() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        eprintln!("Warning: Could not read commands from stdin: {e}");
    }
    rx
}

fn cmd_pause() {
    let mut config = load_config();
    config.paused = true;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Logging paused. Use 'airlogger resume' to continue.");
}

fn cmd_resume() {
    let mut config = load_config();
    config.paused = false;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Logging resumed.");
}

fn cmd_status(reset: bool) {
    let config = Config::load().unwrap_or_default();
    let stats_path = config.data_path.join("stats.json");

    if reset {
        let stats = SessionStats::with_persistence(stats_path.clone());
        stats.reset();
        if let Err(e) = stats.save() {
            eprintln!("Error saving statistics: {e}");
            std::process::exit(1);
        }
        println!("Cumulative statistics cleared.");
        println!();
    }

    println!("airlogger Status");
    println!("================");
    println!();

    println!("Configuration:");
    print_sources(&config);
    println!("  Tick: {}ms", config.tick_interval.as_millis());
    println!("  Debounce threshold: {}", config.debounce_threshold);
    println!("  Log directory: {:?}", config.log_dir);
    println!("  Paused: {}", config.paused);
    println!();

    if stats_path.exists() {
        println!("Cumulative {}", SessionStats::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config(init: bool) {
    let config = Config::load().unwrap_or_default();

    if init {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Wrote {:?}", Config::config_path());
        return;
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing config: {e}"),
    }
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16, simulate: bool) {
    use airlogger::server::{run, ServerConfig};

    let controller = build_controller(load_config(), simulate);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let (addr, shutdown_tx) = match runtime.block_on(run(ServerConfig::new(port, controller.clone()))) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error starting server: {e}");
            std::process::exit(1);
        }
    };

    println!("Control surface on http://{addr}");
    println!("  POST /control/start | pause | resume | stop");
    println!("  GET  /state | /status | /latest");
    println!("Press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = controller.stop() {
        eprintln!("Error stopping session: {e}");
    }
    if let Err(e) = controller.stats().save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }
    runtime.shutdown_timeout(Duration::from_secs(2));
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_flag_holds_new_session_paused() {
        assert_eq!(
            pause_flag_event(SessionState::Collecting, true),
            Some(ControlEvent::Pause)
        );
        assert_eq!(pause_flag_event(SessionState::Collecting, false), None);
    }

    #[test]
    fn test_pause_flag_cleared_resumes() {
        assert_eq!(
            pause_flag_event(SessionState::Paused, false),
            Some(ControlEvent::Resume)
        );
        assert_eq!(pause_flag_event(SessionState::Paused, true), None);
    }

    #[test]
    fn test_pause_flag_ignored_without_session() {
        for paused in [true, false] {
            assert_eq!(pause_flag_event(SessionState::Idle, paused), None);
            assert_eq!(pause_flag_event(SessionState::Stopped, paused), None);
        }
    }
}
