//! Source adapters for the logger.
//!
//! Each adapter wraps one external data provider (gpsd, a sensor helper
//! program, the firmware's `vcgencmd`, or a simulator) behind the blocking
//! [`SourceAdapter::poll`] call. Adapters never run on the caller's thread
//! directly: the sampler hands them to a dedicated poll worker so a hung
//! device can be bounded by a timeout.

pub mod command;
pub mod gpsd;
pub mod sim;
pub mod types;
pub mod vcgencmd;

pub use types::{
    FieldValue, Reading, SourceError, SourceKind, ENVIRONMENT_FIELDS, GPS_FIELDS, SYSTEM_FIELDS,
};

use crate::config::{BackendConfig, ConfigError, SourcesConfig};

/// A wrapped data provider.
pub trait SourceAdapter: Send {
    /// The source group this adapter produces readings for.
    fn kind(&self) -> SourceKind;

    /// Produce one complete reading, or explain why none is available.
    ///
    /// May block; the sampler enforces its own timeout around this call.
    fn poll(&mut self) -> Result<Reading, SourceError>;
}

/// Builds a fresh adapter for a new session.
///
/// Errors returned here are configuration errors: they keep the session Idle.
pub type AdapterFactory =
    Box<dyn Fn() -> Result<Box<dyn SourceAdapter>, SourceError> + Send + Sync>;

/// One adapter factory per source group.
pub struct SourceSet {
    factories: [AdapterFactory; 3],
}

impl SourceSet {
    pub fn new(gps: AdapterFactory, environment: AdapterFactory, system: AdapterFactory) -> Self {
        Self {
            factories: [gps, environment, system],
        }
    }

    /// Build factories from the configured backends.
    pub fn from_config(config: &SourcesConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            factory_for(SourceKind::Gps, &config.gps.backend)?,
            factory_for(SourceKind::Environment, &config.environment.backend)?,
            factory_for(SourceKind::System, &config.system.backend)?,
        ))
    }

    /// Simulated adapters for every source.
    pub fn simulated() -> Self {
        Self::new(
            factory_for_simulated(SourceKind::Gps),
            factory_for_simulated(SourceKind::Environment),
            factory_for_simulated(SourceKind::System),
        )
    }

    /// Construct the adapter for one source and check it reports the right kind.
    pub fn build(&self, kind: SourceKind) -> Result<Box<dyn SourceAdapter>, SourceError> {
        let adapter = (self.factories[kind.index()])()?;
        if adapter.kind() != kind {
            return Err(SourceError::WrongSource {
                expected: kind,
                actual: adapter.kind(),
            });
        }
        Ok(adapter)
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet").finish_non_exhaustive()
    }
}

fn factory_for_simulated(kind: SourceKind) -> AdapterFactory {
    Box::new(move || Ok(Box::new(sim::SimulatedSource::new(kind)) as Box<dyn SourceAdapter>))
}

/// Create the factory for a configured backend.
pub fn factory_for(kind: SourceKind, backend: &BackendConfig) -> Result<AdapterFactory, ConfigError> {
    match backend.clone() {
        BackendConfig::Simulated => Ok(factory_for_simulated(kind)),
        BackendConfig::Gpsd {
            host,
            port,
            read_timeout_ms,
        } => {
            if kind != SourceKind::Gps {
                return Err(ConfigError::Invalid(format!(
                    "gpsd backend cannot serve the {kind} source"
                )));
            }
            let settings = gpsd::GpsdSettings {
                host,
                port,
                read_timeout: std::time::Duration::from_millis(read_timeout_ms),
            };
            Ok(Box::new(move || {
                let source = gpsd::GpsdSource::connect(&settings)?;
                Ok(Box::new(source) as Box<dyn SourceAdapter>)
            }))
        }
        BackendConfig::Vcgencmd { program } => {
            if kind != SourceKind::System {
                return Err(ConfigError::Invalid(format!(
                    "vcgencmd backend cannot serve the {kind} source"
                )));
            }
            Ok(Box::new(move || {
                let source = vcgencmd::VcgencmdSource::new(program.clone());
                source.probe()?;
                Ok(Box::new(source) as Box<dyn SourceAdapter>)
            }))
        }
        BackendConfig::Command { program, args } => {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "command backend for the {kind} source has no program"
                )));
            }
            Ok(Box::new(move || {
                Ok(Box::new(command::CommandSource::new(kind, program.clone(), args.clone()))
                    as Box<dyn SourceAdapter>)
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_mismatch_is_config_error() {
        let backend = BackendConfig::Vcgencmd {
            program: "vcgencmd".to_string(),
        };
        assert!(matches!(
            factory_for(SourceKind::Gps, &backend),
            Err(ConfigError::Invalid(_))
        ));
        assert!(factory_for(SourceKind::System, &backend).is_ok());
    }

    #[test]
    fn test_simulated_set_builds_every_kind() {
        let set = SourceSet::simulated();
        for kind in SourceKind::ALL {
            let mut adapter = set.build(kind).unwrap();
            assert_eq!(adapter.kind(), kind);
            assert!(adapter.poll().unwrap().validate().is_ok());
        }
    }

    #[test]
    fn test_wrong_adapter_kind_is_rejected() {
        let set = SourceSet::new(
            factory_for_simulated(SourceKind::System),
            factory_for_simulated(SourceKind::Environment),
            factory_for_simulated(SourceKind::System),
        );
        assert!(matches!(
            set.build(SourceKind::Gps),
            Err(SourceError::WrongSource { .. })
        ));
    }
}
