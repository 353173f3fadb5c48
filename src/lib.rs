//! airlogger - multi-source sensor sampling and session logging.
//!
//! This library polls independent sources (a GPS receiver, an environmental
//! sensor board and the host's health counters) at their own cadences, merges
//! their latest readings on a fixed tick and appends one row per tick to a
//! per-session CSV log.
//!
//! # Guarantees
//!
//! - **One row per tick**: every row has all 18 columns, in a fixed order
//! - **No fabricated values**: an unavailable source shows up as `N/A`, never as zero
//! - **No torn readings**: a row never mixes fields of two readings of one source
//! - **Nothing after stop**: once pause or stop returns, no further row is written
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           airlogger                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐                                              │
//! │  │ GPS sampler │──┐                                           │
//! │  └─────────────┘  │   ┌─────────────┐   ┌─────────────┐       │
//! │  ┌─────────────┐  ├──▶│   Reading   │──▶│ Aggregator  │       │
//! │  │ Env sampler │──┤   │    Store    │   │ (fixed tick)│       │
//! │  └─────────────┘  │   └─────────────┘   └─────────────┘       │
//! │  ┌─────────────┐  │                            │              │
//! │  │ Sys sampler │──┘                            ▼              │
//! │  └─────────────┘                        ┌─────────────┐       │
//! │         ▲                               │  CSV sink   │       │
//! │         │ start/pause/resume/stop       └─────────────┘       │
//! │  ┌─────────────┐                                              │
//! │  │ Controller  │                                              │
//! │  └─────────────┘                                              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use airlogger::{create_shared_stats, Config, SessionController, SourceSet};
//! use airlogger::sink::csv_sink_factory;
//!
//! let config = Config::default();
//! let sinks = csv_sink_factory(config.log_dir.clone(), config.fsync);
//! let controller =
//!     SessionController::new(config, SourceSet::simulated(), sinks, create_shared_stats());
//!
//! controller.start().expect("Failed to start session");
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! controller.stop().expect("Failed to stop session");
//! ```

pub mod config;
pub mod core;
pub mod session;
pub mod sink;
pub mod source;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{BackendConfig, Config, ConfigError, SourceSettings, SourcesConfig};
pub use core::{Column, OutputRecord, ReadingStore, Snapshot, COLUMN_COUNT, SENTINEL};
pub use session::{
    ControlEvent, SessionController, SessionError, SessionState, SessionStatus, Transition,
};
pub use sink::{CsvLogSink, RecordSink, SinkError, SinkFactory};
pub use source::{FieldValue, Reading, SourceAdapter, SourceError, SourceKind, SourceSet};
pub use stats::{create_shared_stats, create_shared_stats_with_persistence, SessionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_line_up() {
        assert_eq!(core::header().len(), COLUMN_COUNT);
        assert_eq!(
            SourceKind::ALL.iter().map(|k| k.fields().len()).sum::<usize>(),
            COLUMN_COUNT
        );
        assert!(!VERSION.is_empty());
    }
}
