//! Sampling loops, one per source.
//!
//! Every loop owns a [`PollWorker`]: a dedicated thread holding the adapter.
//! The loop asks the worker for a reading and waits at most the configured
//! timeout, so a hung device shows up as a poll failure instead of stalling
//! the loop. A poll that outlives its timeout stays in flight; its result is
//! picked up by the next poll instead of issuing a second request, and keeps
//! the time the adapter actually produced it.

use crate::core::store::ReadingStore;
use crate::session::SessionState;
use crate::source::{Reading, SourceAdapter, SourceError, SourceKind};
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cancellation signal shared by all loops of one session.
///
/// Nothing is ever sent on the channel; triggering drops the only sender, which
/// wakes every waiting receiver at once.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    listener: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, listener) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(sender))),
            listener,
        }
    }

    /// Ask every loop to exit. Idempotent.
    pub fn trigger(&self) {
        self.trigger.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.listener.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration`, waking early on shutdown. Returns `true` if triggered.
    pub fn wait(&self, duration: Duration) -> bool {
        !matches!(
            self.listener.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    pub fn listener(&self) -> &Receiver<()> {
        &self.listener
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs an adapter on its own thread and answers poll requests with a timeout.
pub struct PollWorker {
    kind: SourceKind,
    requests: Sender<()>,
    results: Receiver<(Result<Reading, SourceError>, Instant)>,
    in_flight: bool,
}

impl PollWorker {
    /// Move the adapter onto a worker thread.
    ///
    /// The thread exits once the worker is dropped and any in-flight poll
    /// returns.
    pub fn spawn(adapter: Box<dyn SourceAdapter>) -> std::io::Result<Self> {
        let kind = adapter.kind();
        let (requests, request_rx) = bounded::<()>(1);
        let (result_tx, results) = bounded(1);

        thread::Builder::new()
            .name(format!("poll-{kind}"))
            .spawn(move || {
                let mut adapter = adapter;
                for () in request_rx.iter() {
                    let result = adapter.poll().and_then(|reading| {
                        if reading.kind() != kind {
                            return Err(SourceError::WrongSource {
                                expected: kind,
                                actual: reading.kind(),
                            });
                        }
                        reading.validate()?;
                        Ok(reading)
                    });
                    if result_tx.send((result, Instant::now())).is_err() {
                        break;
                    }
                }
                debug!(source = %kind, "poll worker exited");
            })?;

        Ok(Self {
            kind,
            requests,
            results,
            in_flight: false,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Request a reading and wait at most `timeout` for it.
    ///
    /// A reading comes back with the instant the adapter returned it.
    pub fn poll(&mut self, timeout: Duration) -> Result<(Reading, Instant), SourceError> {
        if !self.in_flight {
            self.requests
                .send(())
                .map_err(|_| SourceError::WorkerStopped)?;
            self.in_flight = true;
        }

        match self.results.recv_timeout(timeout) {
            Ok((result, captured_at)) => {
                self.in_flight = false;
                result.map(|reading| (reading, captured_at))
            }
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = false;
                Err(SourceError::WorkerStopped)
            }
        }
    }
}

/// Polling cadence for one sampler.
#[derive(Debug, Clone, Copy)]
pub struct SamplerTiming {
    pub interval: Duration,
    pub timeout: Duration,
    pub poll_while_paused: bool,
}

/// The polling loop for one source.
pub struct Sampler {
    worker: PollWorker,
    store: Arc<ReadingStore>,
    state: Arc<RwLock<SessionState>>,
    shutdown: ShutdownSignal,
    stats: SharedStats,
    timing: SamplerTiming,
}

impl Sampler {
    pub fn new(
        worker: PollWorker,
        store: Arc<ReadingStore>,
        state: Arc<RwLock<SessionState>>,
        shutdown: ShutdownSignal,
        stats: SharedStats,
        timing: SamplerTiming,
    ) -> Self {
        Self {
            worker,
            store,
            state,
            shutdown,
            stats,
            timing,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.worker.kind()
    }

    /// Poll until the session stops.
    ///
    /// Exit is bounded by one in-flight poll timeout plus one interval.
    pub fn run(mut self) {
        let kind = self.kind();
        info!(source = %kind, interval = ?self.timing.interval, "sampler started");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let state = *self.state.read();
            match state {
                SessionState::Stopped => break,
                SessionState::Paused if !self.timing.poll_while_paused => {}
                _ => {
                    self.poll_once();
                }
            }

            if self.shutdown.wait(self.timing.interval) {
                break;
            }
        }

        info!(source = %kind, "sampler stopped");
    }

    /// One poll; updates the store on success, applies the debounce on failure.
    pub fn poll_once(&mut self) -> bool {
        let kind = self.kind();
        match self.worker.poll(self.timing.timeout) {
            Ok((reading, captured_at)) => {
                self.store.update_at(reading, captured_at);
                self.stats.record_poll(kind, true);
                true
            }
            Err(e) => {
                debug!(source = %kind, error = %e, "poll failed");
                self.store.record_failure(kind, &e);
                self.stats.record_poll(kind, false);
                false
            }
        }
    }
}
