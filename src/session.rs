//! Session control.
//!
//! The [`SessionController`] is the only component that starts and ends a
//! session. It owns the state machine
//!
//! ```text
//!            start              pause
//!   Idle ─────────────▶ Collecting ◀──────▶ Paused
//!    ▲                      │       resume    │
//!    │ start                │ stop            │ stop
//!    └──────── Stopped ◀────┴─────────────────┘
//! ```
//!
//! and the threads of the running session: one sampler per source plus the
//! aggregator. Invalid events are ignored with a warning. A log write failure
//! inside the aggregator forces the session to `Stopped`; the controller
//! reaps the finished threads on the next event.

use crate::config::{Config, ConfigError};
use crate::core::aggregator::{Aggregator, OutputRecord};
use crate::core::sampler::{PollWorker, Sampler, SamplerTiming, ShutdownSignal};
use crate::core::store::{ReadingStore, Snapshot};
use crate::sink::{csv_sink_factory, SinkError, SinkFactory};
use crate::source::{SourceAdapter, SourceError, SourceKind, SourceSet};
use crate::stats::{SharedStats, StatsSnapshot};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle of one logging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session running
    Idle,
    /// Sources polled, rows written
    Collecting,
    /// Sources polled, rows not written
    Paused,
    /// Session ended; a new start opens a fresh session
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Collecting => "collecting",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// External control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlEvent {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlEvent::Start => "start",
            ControlEvent::Pause => "pause",
            ControlEvent::Resume => "resume",
            ControlEvent::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl FromStr for ControlEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(ControlEvent::Start),
            "pause" => Ok(ControlEvent::Pause),
            "resume" => Ok(ControlEvent::Resume),
            "stop" => Ok(ControlEvent::Stop),
            other => Err(format!("unknown control event '{other}'")),
        }
    }
}

/// The state an event leads to, or `None` if the event is not valid in `state`.
pub fn next_state(state: SessionState, event: ControlEvent) -> Option<SessionState> {
    use ControlEvent::*;
    use SessionState::*;

    match (state, event) {
        (Idle | Stopped, Start) => Some(Collecting),
        (Collecting, Pause) => Some(Paused),
        (Paused, Resume) => Some(Collecting),
        (Collecting | Paused, Stop) => Some(Stopped),
        _ => None,
    }
}

/// What a control event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Transition {
    Applied {
        event: ControlEvent,
        from: SessionState,
        to: SessionState,
    },
    /// The event is not valid in the current state; nothing changed.
    Ignored {
        event: ControlEvent,
        state: SessionState,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Errors that keep a session from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{kind} source could not be opened: {source}")]
    Source {
        kind: SourceKind,
        #[source]
        source: SourceError,
    },

    #[error("log file could not be opened: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Availability of one source, for display.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: SourceKind,
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub age_ms: Option<u64>,
}

/// Read-only view of the controller for a control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Local>>,
    pub log_path: Option<PathBuf>,
    pub ticks: u64,
    pub records_written: u64,
    pub records_withheld: u64,
    pub sources: Vec<SourceStatus>,
    pub fault: Option<String>,
}

/// Bookkeeping for the current (or most recent) session.
struct SessionRun {
    id: Uuid,
    started_at: DateTime<Local>,
    log_path: Option<PathBuf>,
    shutdown: ShutdownSignal,
    threads: Vec<JoinHandle<()>>,
    baseline: StatsSnapshot,
}

impl SessionRun {
    fn join(&mut self) {
        self.shutdown.trigger();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("session").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "session thread panicked");
            }
        }
    }
}

/// Drives sessions and exposes their state.
pub struct SessionController {
    config: Config,
    sources: SourceSet,
    sink_factory: SinkFactory,
    stats: SharedStats,
    store: Arc<ReadingStore>,
    state: Arc<RwLock<SessionState>>,
    latest: Arc<RwLock<Option<OutputRecord>>>,
    fault: Arc<Mutex<Option<String>>>,
    run: Mutex<Option<SessionRun>>,
}

impl SessionController {
    pub fn new(config: Config, sources: SourceSet, sink_factory: SinkFactory, stats: SharedStats) -> Self {
        let store = Arc::new(ReadingStore::new(config.debounce_threshold));
        Self {
            config,
            sources,
            sink_factory,
            stats,
            store,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            latest: Arc::new(RwLock::new(None)),
            fault: Arc::new(Mutex::new(None)),
            run: Mutex::new(None),
        }
    }

    /// Controller with the configured backends writing CSV logs to `config.log_dir`.
    pub fn from_config(config: Config, stats: SharedStats) -> Result<Self, ConfigError> {
        config.validate()?;
        let sources = SourceSet::from_config(&config.sources)?;
        let sink_factory = csv_sink_factory(config.log_dir.clone(), config.fsync);
        Ok(Self::new(config, sources, sink_factory, stats))
    }

    /// Apply one control event.
    ///
    /// Invalid events return [`Transition::Ignored`]. Errors are only returned
    /// when a session cannot start; the state is then `Idle`.
    pub fn handle(&self, event: ControlEvent) -> Result<Transition, SessionError> {
        let mut run = self.run.lock();
        self.reap(&mut run);

        let current = *self.state.read();
        let Some(next) = next_state(current, event) else {
            warn!(%event, state = %current, "ignoring control event");
            return Ok(Transition::Ignored {
                event,
                state: current,
            });
        };

        match event {
            ControlEvent::Start => self.start_session(&mut run)?,
            ControlEvent::Pause | ControlEvent::Resume => {
                let mut state = self.state.write();
                let actual = *state;
                if actual != current {
                    // The aggregator ended the session in the meantime.
                    warn!(%event, state = %actual, "ignoring control event");
                    return Ok(Transition::Ignored {
                        event,
                        state: actual,
                    });
                }
                *state = next;
            }
            ControlEvent::Stop => self.stop_session(&mut run),
        }

        info!(%event, from = %current, to = %next, "session transition");
        Ok(Transition::Applied {
            event,
            from: current,
            to: next,
        })
    }

    pub fn start(&self) -> Result<Transition, SessionError> {
        self.handle(ControlEvent::Start)
    }

    pub fn pause(&self) -> Result<Transition, SessionError> {
        self.handle(ControlEvent::Pause)
    }

    pub fn resume(&self) -> Result<Transition, SessionError> {
        self.handle(ControlEvent::Resume)
    }

    pub fn stop(&self) -> Result<Transition, SessionError> {
        self.handle(ControlEvent::Stop)
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Latest record produced by the aggregator, whether or not it was logged.
    pub fn latest_record(&self) -> Option<OutputRecord> {
        self.latest.read().clone()
    }

    /// The fault that ended the last session, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        let run = self.run.lock();
        let snapshot = self.store.snapshot();
        let now = self.stats.snapshot();

        let sources = SourceKind::ALL
            .iter()
            .map(|&kind| {
                let slot = snapshot.slot(kind);
                SourceStatus {
                    source: kind,
                    available: slot.available,
                    consecutive_failures: slot.consecutive_failures,
                    last_error: slot.last_error.clone(),
                    age_ms: slot.age().map(|d| d.as_millis() as u64),
                }
            })
            .collect();

        let (ticks, written, withheld) = match run.as_ref() {
            Some(r) => (
                now.ticks.saturating_sub(r.baseline.ticks),
                now.records_written.saturating_sub(r.baseline.records_written),
                now.records_withheld
                    .saturating_sub(r.baseline.records_withheld),
            ),
            None => (0, 0, 0),
        };

        SessionStatus {
            state: self.state(),
            session_id: run.as_ref().map(|r| r.id),
            started_at: run.as_ref().map(|r| r.started_at),
            log_path: run.as_ref().and_then(|r| r.log_path.clone()),
            ticks,
            records_written: written,
            records_withheld: withheld,
            sources,
            fault: self.fault(),
        }
    }

    /// Join the threads of a session the aggregator has already stopped.
    fn reap(&self, run: &mut Option<SessionRun>) {
        if *self.state.read() != SessionState::Stopped {
            return;
        }
        if let Some(r) = run.as_mut() {
            if !r.threads.is_empty() {
                r.join();
                self.save_stats();
            }
        }
    }

    fn start_session(&self, run: &mut Option<SessionRun>) -> Result<(), SessionError> {
        // A stopped session is finished; the new one starts from Idle.
        *self.state.write() = SessionState::Idle;

        self.config.validate()?;

        let mut adapters = Vec::with_capacity(SourceKind::ALL.len());
        for kind in SourceKind::ALL {
            let adapter = self
                .sources
                .build(kind)
                .map_err(|source| SessionError::Source { kind, source })?;
            adapters.push(adapter);
        }

        let started_at = Local::now();
        let sink = (self.sink_factory)(started_at)?;
        let log_path = sink.path().map(Path::to_path_buf);

        self.store.reset();
        *self.latest.write() = None;
        *self.fault.lock() = None;

        let shutdown = ShutdownSignal::new();
        let mut threads = Vec::with_capacity(SourceKind::ALL.len() + 1);
        let baseline = self.stats.snapshot();
        *self.state.write() = SessionState::Collecting;

        if let Err(e) = self.spawn_threads(adapters, sink, &shutdown, &mut threads) {
            shutdown.trigger();
            for handle in threads {
                let _ = handle.join();
            }
            *self.state.write() = SessionState::Idle;
            return Err(e);
        }

        let id = Uuid::new_v4();
        info!(
            session = %id,
            log = ?log_path,
            "session started"
        );
        self.stats.record_session_started();

        *run = Some(SessionRun {
            id,
            started_at,
            log_path,
            shutdown,
            threads,
            baseline,
        });
        Ok(())
    }

    fn spawn_threads(
        &self,
        adapters: Vec<Box<dyn SourceAdapter>>,
        sink: Box<dyn crate::sink::RecordSink>,
        shutdown: &ShutdownSignal,
        threads: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), SessionError> {
        for adapter in adapters {
            let kind = adapter.kind();
            let settings = self.config.sources.get(kind);
            let worker = PollWorker::spawn(adapter).map_err(|source| SessionError::Spawn {
                name: format!("poll-{kind}"),
                source,
            })?;

            let sampler = Sampler::new(
                worker,
                self.store.clone(),
                self.state.clone(),
                shutdown.clone(),
                self.stats.clone(),
                SamplerTiming {
                    interval: settings.interval,
                    timeout: settings.timeout,
                    poll_while_paused: self.config.poll_while_paused,
                },
            );

            let name = format!("sampler-{kind}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || sampler.run())
                .map_err(|source| SessionError::Spawn { name, source })?;
            threads.push(handle);
        }

        let aggregator = Aggregator::new(
            self.store.clone(),
            self.state.clone(),
            self.latest.clone(),
            self.fault.clone(),
            shutdown.clone(),
            self.stats.clone(),
            sink,
            self.config.tick_interval,
        );
        let handle = thread::Builder::new()
            .name("aggregator".to_string())
            .spawn(move || aggregator.run())
            .map_err(|source| SessionError::Spawn {
                name: "aggregator".to_string(),
                source,
            })?;
        threads.push(handle);

        Ok(())
    }

    fn stop_session(&self, run: &mut Option<SessionRun>) {
        // Waits for an in-flight row; nothing is written after this.
        *self.state.write() = SessionState::Stopped;

        if let Some(r) = run.as_mut() {
            r.join();
            info!(session = %r.id, "session stopped");
        }
        self.save_stats();
    }

    fn save_stats(&self) {
        if let Err(e) = self.stats.save() {
            warn!(error = %e, "could not save statistics");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let run = self.run.get_mut();
        if let Some(r) = run.as_mut() {
            if !r.threads.is_empty() {
                *self.state.write() = SessionState::Stopped;
                r.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph() {
        use ControlEvent::*;
        use SessionState::*;

        assert_eq!(next_state(Idle, Start), Some(Collecting));
        assert_eq!(next_state(Collecting, Pause), Some(Paused));
        assert_eq!(next_state(Paused, Resume), Some(Collecting));
        assert_eq!(next_state(Collecting, Stop), Some(Stopped));
        assert_eq!(next_state(Paused, Stop), Some(Stopped));
        assert_eq!(next_state(Stopped, Start), Some(Collecting));

        assert_eq!(next_state(Idle, Pause), None);
        assert_eq!(next_state(Idle, Resume), None);
        assert_eq!(next_state(Idle, Stop), None);
        assert_eq!(next_state(Collecting, Start), None);
        assert_eq!(next_state(Collecting, Resume), None);
        assert_eq!(next_state(Paused, Pause), None);
        assert_eq!(next_state(Paused, Start), None);
        assert_eq!(next_state(Stopped, Pause), None);
        assert_eq!(next_state(Stopped, Stop), None);
    }

    #[test]
    fn test_parse_control_event() {
        assert_eq!(" Pause\n".parse::<ControlEvent>(), Ok(ControlEvent::Pause));
        assert_eq!("STOP".parse::<ControlEvent>(), Ok(ControlEvent::Stop));
        assert!("launch".parse::<ControlEvent>().is_err());
    }

    #[test]
    fn test_transition_serialization() {
        let t = Transition::Ignored {
            event: ControlEvent::Pause,
            state: SessionState::Idle,
        };
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["outcome"], "ignored");
        assert_eq!(json["event"], "pause");
        assert_eq!(json["state"], "idle");
    }
}
