//! System-health adapter using the Raspberry Pi firmware tool `vcgencmd`.

use super::{Reading, SourceAdapter, SourceError, SourceKind};
use std::process::Command;

/// Reads core voltage and SoC temperature through `vcgencmd`.
pub struct VcgencmdSource {
    program: String,
}

impl VcgencmdSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that the tool can be executed at all.
    pub fn probe(&self) -> Result<(), SourceError> {
        self.run(&["version"]).map(|_| ())
    }

    fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(SourceError::Unavailable(format!(
                "{} {} exited with {}",
                self.program,
                args.join(" "),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SourceAdapter for VcgencmdSource {
    fn kind(&self) -> SourceKind {
        SourceKind::System
    }

    fn poll(&mut self) -> Result<Reading, SourceError> {
        let voltage = parse_measurement(&self.run(&["measure_volts", "core"])?, "volt")?;
        let cpu_temp = parse_measurement(&self.run(&["measure_temp"])?, "temp")?;

        Ok(Reading::new(SourceKind::System)
            .with("voltage", voltage)
            .with("cpu_temp", cpu_temp))
    }
}

/// Parse `key=<number><unit>` output such as `volt=0.8563V` or `temp=47.2'C`.
pub fn parse_measurement(output: &str, key: &str) -> Result<f64, SourceError> {
    let value = output
        .trim()
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| SourceError::Malformed(format!("expected '{key}=', got '{output}'")))?;

    let numeric: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    numeric
        .parse()
        .map_err(|_| SourceError::Malformed(format!("no number in '{output}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_voltage_and_temperature() {
        assert!((parse_measurement("volt=0.8563V", "volt").unwrap() - 0.8563).abs() < 1e-9);
        assert!((parse_measurement("temp=47.2'C\n", "temp").unwrap() - 47.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_unexpected_output() {
        assert!(parse_measurement("error=1 error_msg=\"Command not registered\"", "volt").is_err());
        assert!(parse_measurement("temp=", "temp").is_err());
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let source = VcgencmdSource::new("/nonexistent/vcgencmd");
        assert!(matches!(source.probe(), Err(SourceError::Unavailable(_))));
    }
}
