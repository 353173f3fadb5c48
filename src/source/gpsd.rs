//! GPS adapter backed by a gpsd daemon.
//!
//! Connects over TCP, switches the daemon into JSON watch mode and reads
//! report lines until a `TPV` report carries every GPS field. Reports with
//! missing, null or `n/a` fields are skipped.

use super::{Reading, SourceAdapter, SourceError, SourceKind};
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on report lines inspected in a single poll.
const MAX_LINES_PER_POLL: usize = 64;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// Connection settings for gpsd.
#[derive(Debug, Clone)]
pub struct GpsdSettings {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
}

impl Default for GpsdSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2947,
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
}

/// A gpsd client producing GPS readings.
///
/// The connection is re-established on the next poll after gpsd closes or
/// resets it.
pub struct GpsdSource {
    settings: GpsdSettings,
    reader: Option<BufReader<TcpStream>>,
    line: String,
}

impl GpsdSource {
    /// Connect to gpsd and enable watch mode.
    pub fn connect(settings: &GpsdSettings) -> Result<Self, SourceError> {
        let reader = open(settings)?;
        Ok(Self {
            settings: settings.clone(),
            reader: Some(reader),
            line: String::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }
}

fn open(settings: &GpsdSettings) -> Result<BufReader<TcpStream>, SourceError> {
    let unavailable = |e: std::io::Error| {
        SourceError::Unavailable(format!("gpsd at {}:{}: {e}", settings.host, settings.port))
    };

    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(unavailable)?
        .next()
        .ok_or_else(|| {
            SourceError::Unavailable(format!("cannot resolve {}:{}", settings.host, settings.port))
        })?;

    let mut stream = TcpStream::connect_timeout(&addr, settings.read_timeout).map_err(unavailable)?;
    stream
        .set_read_timeout(Some(settings.read_timeout))
        .map_err(unavailable)?;
    stream.write_all(WATCH_COMMAND).map_err(unavailable)?;

    debug!(%addr, "connected to gpsd");
    Ok(BufReader::new(stream))
}

/// Read report lines until a complete TPV report arrives.
fn next_fix(reader: &mut BufReader<TcpStream>, line: &mut String) -> Result<Reading, SourceError> {
    for _ in 0..MAX_LINES_PER_POLL {
        line.clear();
        if reader.read_line(line)? == 0 {
            return Err(SourceError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "gpsd closed the connection",
            )));
        }
        if let Some(reading) = parse_tpv(line) {
            return Ok(reading);
        }
    }

    Err(SourceError::Unavailable(format!(
        "no complete TPV report in {MAX_LINES_PER_POLL} lines"
    )))
}

/// Whether the error leaves the socket unusable. A read timeout does not.
fn connection_lost(error: &SourceError) -> bool {
    match error {
        SourceError::Io(e) => !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        _ => false,
    }
}

impl SourceAdapter for GpsdSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gps
    }

    fn poll(&mut self) -> Result<Reading, SourceError> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => {
                let reader = open(&self.settings)?;
                info!(host = %self.settings.host, port = self.settings.port, "reconnected to gpsd");
                reader
            }
        };

        let result = next_fix(&mut reader, &mut self.line);
        match &result {
            Err(e) if connection_lost(e) => {
                warn!(error = %e, "lost gpsd connection");
            }
            _ => self.reader = Some(reader),
        }
        result
    }
}

/// Parse one gpsd report line into a complete GPS reading.
///
/// Returns `None` for non-TPV reports and for TPV reports lacking any field.
pub fn parse_tpv(line: &str) -> Option<Reading> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let report: Report = serde_json::from_value(value.clone()).ok()?;
    if report.class != "TPV" {
        return None;
    }

    let reading = Reading::from_json_object(SourceKind::Gps, value.as_object()?);
    reading.validate().ok()?;
    Some(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FieldValue;
    use std::net::TcpListener;
    use std::thread;

    const TPV: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"time":"2024-05-01T10:00:00.000Z","lat":51.4778,"lon":-0.0015,"alt":46.2,"speed":12.5,"climb":0.4,"track":271.3}"#;

    #[test]
    fn test_parse_complete_tpv() {
        let reading = parse_tpv(TPV).unwrap();
        assert_eq!(reading.kind(), SourceKind::Gps);
        assert_eq!(reading.get("lat"), Some(&FieldValue::Number(51.4778)));
        assert_eq!(
            reading.get("time"),
            Some(&FieldValue::Text("2024-05-01T10:00:00.000Z".to_string()))
        );
    }

    #[test]
    fn test_skip_other_report_classes() {
        assert!(parse_tpv(r#"{"class":"VERSION","release":"3.22"}"#).is_none());
        assert!(parse_tpv(r#"{"class":"SKY","satellites":[]}"#).is_none());
        assert!(parse_tpv("not json").is_none());
    }

    #[test]
    fn test_skip_tpv_without_fix() {
        let no_fix = r#"{"class":"TPV","mode":1,"time":"2024-05-01T10:00:00.000Z"}"#;
        assert!(parse_tpv(no_fix).is_none());

        let placeholder = TPV.replace("271.3", "\"n/a\"");
        assert!(parse_tpv(&placeholder).is_none());
    }

    /// Accept `sessions` connections, answer each WATCH with one TPV line, then hang up.
    fn serve_one_fix_per_connection(listener: TcpListener, sessions: usize) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for _ in 0..sessions {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut watch = String::new();
                reader.read_line(&mut watch).unwrap();
                assert!(watch.starts_with("?WATCH="));

                let mut stream = stream;
                writeln!(stream, "{TPV}").unwrap();
            }
        })
    }

    #[test]
    fn test_reconnects_after_gpsd_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = GpsdSettings {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            read_timeout: Duration::from_secs(2),
        };
        let server = serve_one_fix_per_connection(listener, 2);

        let mut source = GpsdSource::connect(&settings).unwrap();
        assert!(source.poll().is_ok());

        // gpsd hung up: the poll fails and the socket is dropped.
        assert!(source.poll().is_err());
        assert!(!source.is_connected());

        // gpsd is accepting again: the next poll reconnects.
        let reading = source.poll().unwrap();
        assert_eq!(reading.get("track"), Some(&FieldValue::Number(271.3)));
        server.join().unwrap();

        // Second hang-up, and now nothing is listening.
        assert!(source.poll().is_err());
        assert!(matches!(source.poll(), Err(SourceError::Unavailable(_))));
        assert!(!source.is_connected());
    }

    #[test]
    fn test_read_timeout_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = GpsdSettings {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            read_timeout: Duration::from_millis(50),
        };

        let mut source = GpsdSource::connect(&settings).unwrap();
        let (_silent, _) = listener.accept().unwrap();

        let err = source.poll().unwrap_err();
        assert!(!connection_lost(&err), "unexpected error {err:?}");
        assert!(source.is_connected());
    }
}
