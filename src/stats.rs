//! Collection statistics.
//!
//! Lock-free counters for ticks, rows and polls, with optional persistence so
//! `airlogger status` can report cumulative totals across runs.

use crate::source::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Counters shared by the samplers, the aggregator and the controller.
#[derive(Debug)]
pub struct SessionStats {
    /// Sessions that reached Collecting
    sessions_started: AtomicU64,
    /// Aggregator ticks
    ticks: AtomicU64,
    /// Rows appended to log files
    records_written: AtomicU64,
    /// Records produced while paused and not forwarded
    records_withheld: AtomicU64,
    /// Successful polls, per source
    polls_ok: [AtomicU64; 3],
    /// Failed polls, per source
    polls_failed: [AtomicU64; 3],
    /// When this process started counting
    started: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            records_withheld: AtomicU64::new(0),
            polls_ok: Default::default(),
            polls_failed: Default::default(),
            started: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            debug!(error = %e, "could not load previous statistics");
        }

        stats
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_withheld(&self) {
        self.records_withheld.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self, kind: SourceKind, ok: bool) {
        let counters = if ok {
            &self.polls_ok
        } else {
            &self.polls_failed
        };
        counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        let per_source = |counters: &[AtomicU64; 3]| SourceCounts {
            gps: counters[SourceKind::Gps.index()].load(Ordering::Relaxed),
            environment: counters[SourceKind::Environment.index()].load(Ordering::Relaxed),
            system: counters[SourceKind::System.index()].load(Ordering::Relaxed),
        };

        StatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_withheld: self.records_withheld.load(Ordering::Relaxed),
            polls_ok: per_source(&self.polls_ok),
            polls_failed: per_source(&self.polls_failed),
            started: self.started,
            uptime_secs: (Utc::now() - self.started).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable block for the CLI.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Logger Statistics:\n\
             - Sessions started: {}\n\
             - Ticks: {}\n\
             - Rows written: {}\n\
             - Rows withheld while paused: {}\n\
             - GPS polls: {} ok / {} failed\n\
             - Environment polls: {} ok / {} failed\n\
             - System polls: {} ok / {} failed\n\
             - Uptime: {} seconds",
            s.sessions_started,
            s.ticks,
            s.records_written,
            s.records_withheld,
            s.polls_ok.gps,
            s.polls_failed.gps,
            s.polls_ok.environment,
            s.polls_failed.environment,
            s.polls_ok.system,
            s.polls_failed.system,
            s.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                sessions_started: s.sessions_started,
                ticks: s.ticks,
                records_written: s.records_written,
                records_withheld: s.records_withheld,
                polls_ok: s.polls_ok,
                polls_failed: s.polls_failed,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.sessions_started
                    .store(persisted.sessions_started, Ordering::Relaxed);
                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.records_written
                    .store(persisted.records_written, Ordering::Relaxed);
                self.records_withheld
                    .store(persisted.records_withheld, Ordering::Relaxed);
                for kind in SourceKind::ALL {
                    self.polls_ok[kind.index()]
                        .store(persisted.polls_ok.get(kind), Ordering::Relaxed);
                    self.polls_failed[kind.index()]
                        .store(persisted.polls_failed.get(kind), Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.records_written.store(0, Ordering::Relaxed);
        self.records_withheld.store(0, Ordering::Relaxed);
        for counter in self.polls_ok.iter().chain(self.polls_failed.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-source counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub gps: u64,
    pub environment: u64,
    pub system: u64,
}

impl SourceCounts {
    pub fn get(&self, kind: SourceKind) -> u64 {
        match kind {
            SourceKind::Gps => self.gps,
            SourceKind::Environment => self.environment,
            SourceKind::System => self.system,
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub ticks: u64,
    pub records_written: u64,
    pub records_withheld: u64,
    pub polls_ok: SourceCounts,
    pub polls_failed: SourceCounts,
    pub started: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    sessions_started: u64,
    ticks: u64,
    records_written: u64,
    records_withheld: u64,
    #[serde(default)]
    polls_ok: SourceCounts,
    #[serde(default)]
    polls_failed: SourceCounts,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedStats = Arc<SessionStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(SessionStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(SessionStats::with_persistence(path))
}
