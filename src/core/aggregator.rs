//! Merging the latest readings into one output row per tick.
//!
//! The aggregator ticks on its own fixed period, independent of the source
//! cadences. Every tick produces exactly one [`OutputRecord`] with all 18
//! columns filled, using [`SENTINEL`] for any source that is unavailable.
//! Records are forwarded to the sink only while the session is collecting.

use crate::core::sampler::ShutdownSignal;
use crate::core::store::{ReadingStore, Snapshot};
use crate::session::SessionState;
use crate::sink::{RecordSink, SinkError};
use crate::source::{FieldValue, SourceKind};
use crate::stats::SharedStats;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Marker written for a field whose source is unavailable.
///
/// Real values are never rendered this way, so a missing reading cannot be
/// confused with a legitimate zero.
pub const SENTINEL: &str = "N/A";

/// Number of columns in every record.
pub const COLUMN_COUNT: usize = 18;

/// The fixed log columns, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Time,
    Lat,
    Lon,
    Alt,
    Speed,
    Climb,
    Track,
    Pressure,
    Humidity,
    Temp,
    Pitch,
    Roll,
    Yaw,
    AccX,
    AccY,
    AccZ,
    Voltage,
    CpuTemp,
}

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Time,
        Column::Lat,
        Column::Lon,
        Column::Alt,
        Column::Speed,
        Column::Climb,
        Column::Track,
        Column::Pressure,
        Column::Humidity,
        Column::Temp,
        Column::Pitch,
        Column::Roll,
        Column::Yaw,
        Column::AccX,
        Column::AccY,
        Column::AccZ,
        Column::Voltage,
        Column::CpuTemp,
    ];

    /// Header name, identical to the field name in the source reading.
    pub fn name(&self) -> &'static str {
        match self {
            Column::Time => "time",
            Column::Lat => "lat",
            Column::Lon => "lon",
            Column::Alt => "alt",
            Column::Speed => "speed",
            Column::Climb => "climb",
            Column::Track => "track",
            Column::Pressure => "pressure",
            Column::Humidity => "humidity",
            Column::Temp => "temp",
            Column::Pitch => "pitch",
            Column::Roll => "roll",
            Column::Yaw => "yaw",
            Column::AccX => "acc_x",
            Column::AccY => "acc_y",
            Column::AccZ => "acc_z",
            Column::Voltage => "voltage",
            Column::CpuTemp => "cpu_temp",
        }
    }

    /// The source that owns this column.
    pub fn source(&self) -> SourceKind {
        match self {
            Column::Time
            | Column::Lat
            | Column::Lon
            | Column::Alt
            | Column::Speed
            | Column::Climb
            | Column::Track => SourceKind::Gps,
            Column::Voltage | Column::CpuTemp => SourceKind::System,
            _ => SourceKind::Environment,
        }
    }
}

/// The header row.
pub fn header() -> [&'static str; COLUMN_COUNT] {
    Column::ALL.map(|c| c.name())
}

/// One field of an output record.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Value(FieldValue),
    Missing,
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => v.as_f64(),
            Cell::Missing => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(v) => v.fmt(f),
            Cell::Missing => f.write_str(SENTINEL),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Value(FieldValue::Number(n)) => serializer.serialize_f64(*n),
            Cell::Value(FieldValue::Text(s)) => serializer.serialize_str(s),
            Cell::Missing => serializer.serialize_str(SENTINEL),
        }
    }
}

/// One merged row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// 1-based tick number within the session
    pub tick: u64,
    /// Wall-clock time the record was assembled
    pub produced_at: DateTime<Local>,
    cells: [Cell; COLUMN_COUNT],
}

impl OutputRecord {
    pub fn get(&self, column: Column) -> &Cell {
        &self.cells[column as usize]
    }

    pub fn cells(&self) -> &[Cell; COLUMN_COUNT] {
        &self.cells
    }

    /// Rendered CSV fields in column order.
    pub fn to_row(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.to_string()).collect()
    }

    /// Number of columns carrying the sentinel.
    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_missing()).count()
    }

    /// A one-line live display of position, temperature and altitude.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] GPS: {}, {} | Temp: {}°C | Alt: {}m",
            self.produced_at.format("%H:%M:%S"),
            self.get(Column::Lat),
            self.get(Column::Lon),
            self.get(Column::Temp),
            self.get(Column::Alt),
        )
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(COLUMN_COUNT + 2))?;
        map.serialize_entry("tick", &self.tick)?;
        map.serialize_entry("produced_at", &self.produced_at.to_rfc3339())?;
        for column in Column::ALL {
            map.serialize_entry(column.name(), self.get(column))?;
        }
        map.end()
    }
}

/// Build the record for one tick from a snapshot.
pub fn assemble(tick: u64, produced_at: DateTime<Local>, snapshot: &Snapshot) -> OutputRecord {
    let cells = Column::ALL.map(|column| {
        snapshot
            .slot(column.source())
            .current()
            .and_then(|reading| reading.get(column.name()))
            .cloned()
            .map(Cell::Value)
            .unwrap_or(Cell::Missing)
    });

    OutputRecord {
        tick,
        produced_at,
        cells,
    }
}

/// The periodic tick loop of one session.
pub struct Aggregator {
    store: Arc<ReadingStore>,
    state: Arc<RwLock<SessionState>>,
    latest: Arc<RwLock<Option<OutputRecord>>>,
    fault: Arc<Mutex<Option<String>>>,
    shutdown: ShutdownSignal,
    stats: SharedStats,
    sink: Box<dyn RecordSink>,
    interval: Duration,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ReadingStore>,
        state: Arc<RwLock<SessionState>>,
        latest: Arc<RwLock<Option<OutputRecord>>>,
        fault: Arc<Mutex<Option<String>>>,
        shutdown: ShutdownSignal,
        stats: SharedStats,
        sink: Box<dyn RecordSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            state,
            latest,
            fault,
            shutdown,
            stats,
            sink,
            interval,
        }
    }

    /// Tick until shutdown, then close the sink.
    pub fn run(mut self) {
        info!(interval = ?self.interval, "aggregator started");
        let ticker = crossbeam_channel::tick(self.interval);
        let mut tick = 0u64;

        loop {
            crossbeam_channel::select! {
                recv(self.shutdown.listener()) -> _ => break,
                recv(ticker) -> _ => {}
            }

            tick += 1;
            if let Err(e) = self.on_tick(tick) {
                self.fail(e);
                break;
            }
        }

        if let Err(e) = self.sink.finish() {
            error!(error = %e, "failed to close log");
            self.fault.lock().get_or_insert_with(|| e.to_string());
        }
        info!(ticks = tick, "aggregator stopped");
    }

    fn on_tick(&mut self, tick: u64) -> Result<(), SinkError> {
        let record = assemble(tick, Local::now(), &self.store.snapshot());
        *self.latest.write() = Some(record.clone());
        self.stats.record_tick();

        // Hold the state read lock across the write: pause and stop wait for
        // an in-flight row, and no row is written after they return.
        let state = self.state.read();
        match *state {
            SessionState::Collecting => {
                self.sink.write(&record)?;
                self.stats.record_written();
            }
            SessionState::Paused => {
                self.stats.record_withheld();
            }
            SessionState::Idle | SessionState::Stopped => {
                debug!(tick, "tick outside an active session");
            }
        }

        Ok(())
    }

    /// Persistence failed: end the session.
    fn fail(&self, e: SinkError) {
        error!(error = %e, "log write failed, stopping session");
        *self.fault.lock() = Some(format!("log write failed: {e}"));
        *self.state.write() = SessionState::Stopped;
        self.shutdown.trigger();
    }
}
