//! Persistence of output records.
//!
//! The CSV sink writes one header row and then one row per record, flushing
//! after every row so a crash loses at most the row being written. Writes are
//! synchronous: a slow disk holds up the aggregator rather than dropping rows.

use crate::core::aggregator::{header, OutputRecord};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Receives records in tick order.
pub trait RecordSink: Send {
    /// Append one record.
    fn write(&mut self, record: &OutputRecord) -> Result<(), SinkError>;

    /// Flush and close. Further writes fail with [`SinkError::Closed`].
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Location of the backing log, if any.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Opens the sink for a new session, given the session start time.
pub type SinkFactory =
    Box<dyn Fn(DateTime<Local>) -> Result<Box<dyn RecordSink>, SinkError> + Send + Sync>;

/// Errors raised while persisting records.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("log file is closed")]
    Closed,

    #[error("no free log file name for {0}")]
    NameExhausted(String),
}

/// File name for a session started at `started_at`.
pub fn log_file_name(started_at: &DateTime<Local>) -> String {
    format!("logger_{}.csv", started_at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Factory producing a [`CsvLogSink`] in `log_dir` for each session.
pub fn csv_sink_factory(log_dir: PathBuf, fsync: bool) -> SinkFactory {
    Box::new(move |started_at| {
        let sink = CsvLogSink::create(&log_dir, &started_at, fsync)?;
        Ok(Box::new(sink) as Box<dyn RecordSink>)
    })
}

/// Append-only CSV log for one session.
pub struct CsvLogSink {
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
    fsync: bool,
    rows: u64,
}

impl CsvLogSink {
    /// Create a new log file and write the header.
    ///
    /// Never truncates an existing file: if the name is taken, `-1`, `-2`, …
    /// is appended.
    pub fn create(log_dir: &Path, started_at: &DateTime<Local>, fsync: bool) -> Result<Self, SinkError> {
        std::fs::create_dir_all(log_dir)?;

        let base = log_file_name(started_at);
        let (file, path) = open_unique(log_dir, &base)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(header())?;
        writer.flush()?;

        info!(path = %path.display(), "log file opened");

        Ok(Self {
            writer: Some(writer),
            path,
            fsync,
            rows: 0,
        })
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

fn open_unique(dir: &Path, base: &str) -> Result<(File, PathBuf), SinkError> {
    let stem = base.trim_end_matches(".csv");
    for attempt in 0..100u32 {
        let name = if attempt == 0 {
            base.to_string()
        } else {
            format!("{stem}-{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(SinkError::NameExhausted(base.to_string()))
}

impl RecordSink for CsvLogSink {
    fn write(&mut self, record: &OutputRecord) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_record(record.to_row())?;
        writer.flush()?;
        if self.fsync {
            writer.get_ref().sync_data()?;
        }
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| SinkError::Io(e.into_error()))?;
            file.sync_all()?;
            info!(path = %self.path.display(), rows = self.rows, "log file closed");
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for CsvLogSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::assemble;
    use crate::core::store::ReadingStore;
    use crate::source::{Reading, SourceKind};
    use chrono::TimeZone;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("airlogger-sink-{}", uuid::Uuid::new_v4()))
    }

    fn start_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 9, 4, 7).unwrap()
    }

    #[test]
    fn test_file_name_pattern() {
        assert_eq!(log_file_name(&start_time()), "logger_2024-05-01_09-04-07.csv");
    }

    #[test]
    fn test_header_and_rows() {
        let dir = temp_dir();
        let mut sink = CsvLogSink::create(&dir, &start_time(), false).unwrap();

        let store = ReadingStore::new(3);
        store.update(
            Reading::new(SourceKind::System)
                .with("voltage", 0.85)
                .with("cpu_temp", 47.2),
        );
        for tick in 1..=3 {
            sink.write(&assemble(tick, Local::now(), &store.snapshot())).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(sink.rows(), 3);

        let content = std::fs::read_to_string(sink.path().unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("time,lat,lon"));
        assert!(lines[1].ends_with(",0.85,47.2"));
        assert_eq!(lines[1].split(',').count(), 18);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_write_after_finish_fails() {
        let dir = temp_dir();
        let mut sink = CsvLogSink::create(&dir, &start_time(), true).unwrap();
        sink.finish().unwrap();
        sink.finish().unwrap();

        let record = assemble(1, Local::now(), &ReadingStore::new(3).snapshot());
        assert!(matches!(sink.write(&record), Err(SinkError::Closed)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_same_second_gets_suffix() {
        let dir = temp_dir();
        let first = CsvLogSink::create(&dir, &start_time(), false).unwrap();
        let second = CsvLogSink::create(&dir, &start_time(), false).unwrap();

        assert_ne!(first.path(), second.path());
        assert!(second
            .path()
            .unwrap()
            .ends_with("logger_2024-05-01_09-04-07-1.csv"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
