//! Run a short session against simulated sources and print the log.
//!
//! ```text
//! cargo run --example simulated_session
//! ```

use airlogger::sink::csv_sink_factory;
use airlogger::{create_shared_stats, Config, SessionController, SourceSet};
use std::thread;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let log_dir = std::env::temp_dir().join("airlogger-demo");

    let mut config = Config::default().simulated();
    config.tick_interval = Duration::from_millis(250);
    config.log_dir = log_dir.clone();

    let sinks = csv_sink_factory(log_dir, config.fsync);
    let controller =
        SessionController::new(config, SourceSet::simulated(), sinks, create_shared_stats());

    controller.start()?;
    for _ in 0..4 {
        thread::sleep(Duration::from_millis(500));
        if let Some(record) = controller.latest_record() {
            println!("{}", record.summary_line());
        }
    }

    controller.pause()?;
    println!("paused; rows are withheld");
    thread::sleep(Duration::from_secs(1));
    controller.resume()?;
    thread::sleep(Duration::from_secs(1));
    controller.stop()?;

    let status = controller.status();
    println!(
        "{} rows written, {} withheld",
        status.records_written, status.records_withheld
    );
    if let Some(path) = status.log_path {
        println!("--- {} ---", path.display());
        print!("{}", std::fs::read_to_string(path)?);
    }

    Ok(())
}
