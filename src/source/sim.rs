//! Simulated sources.
//!
//! These exist so the logger can run headless on a machine without the
//! sensor hardware. Values follow slow deterministic curves around a level
//! flight at a few hundred metres.

use super::{Reading, SourceAdapter, SourceError, SourceKind};
use chrono::{SecondsFormat, Utc};

/// A synthetic data provider for one source group.
pub struct SimulatedSource {
    kind: SourceKind,
    step: u64,
}

impl SimulatedSource {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind, step: 0 }
    }
}

impl SourceAdapter for SimulatedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn poll(&mut self) -> Result<Reading, SourceError> {
        self.step += 1;
        let t = self.step as f64 / 10.0;

        let reading = match self.kind {
            SourceKind::Gps => Reading::new(SourceKind::Gps)
                .with("time", Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
                .with("lat", 47.3769 + 0.0001 * t)
                .with("lon", 8.5417 + 0.0001 * t.sin())
                .with("alt", 420.0 + 5.0 * (t / 3.0).sin())
                .with("speed", 22.0 + t.cos())
                .with("climb", 0.5 * (t / 3.0).cos())
                .with("track", (90.0 + 10.0 * t.sin()).rem_euclid(360.0)),
            SourceKind::Environment => Reading::new(SourceKind::Environment)
                .with("pressure", 963.0 - 0.6 * (t / 3.0).sin())
                .with("humidity", 45.0 + 2.0 * (t / 7.0).sin())
                .with("temp", 18.0 + 0.5 * (t / 11.0).sin())
                .with("pitch", 2.0 * t.sin())
                .with("roll", 3.0 * (t / 2.0).cos())
                .with("yaw", (90.0 + 10.0 * t.sin()).rem_euclid(360.0))
                .with("acc_x", 0.02 * t.sin())
                .with("acc_y", 0.02 * t.cos())
                .with("acc_z", 1.0 + 0.01 * (t * 3.0).sin()),
            SourceKind::System => Reading::new(SourceKind::System)
                .with("voltage", 0.85 + 0.005 * (t / 5.0).sin())
                .with("cpu_temp", 48.0 + 3.0 * (t / 13.0).sin()),
        };

        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_readings_are_complete_and_change() {
        for kind in SourceKind::ALL {
            let mut source = SimulatedSource::new(kind);
            let first = source.poll().unwrap();
            let second = source.poll().unwrap();
            assert!(first.validate().is_ok());
            assert_eq!(first.len(), kind.fields().len());
            assert_ne!(first, second);
        }
    }
}
