//! Adapter that runs a helper program printing one JSON object per poll.
//!
//! Used for sensor boards whose drivers only exist outside Rust: the helper
//! prints e.g. `{"pressure":1013.2,"humidity":41.0,...}` and exits.

use super::{Reading, SourceAdapter, SourceError, SourceKind};
use std::process::Command;

pub struct CommandSource {
    kind: SourceKind,
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(kind: SourceKind, program: String, args: Vec<String>) -> Self {
        Self {
            kind,
            program,
            args,
        }
    }
}

impl SourceAdapter for CommandSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn poll(&mut self) -> Result<Reading, SourceError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(SourceError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        parse_output(self.kind, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse helper output into a reading for `kind`.
pub fn parse_output(kind: SourceKind, stdout: &str) -> Result<Reading, SourceError> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| SourceError::Malformed(format!("helper output is not JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| SourceError::Malformed("helper output is not a JSON object".to_string()))?;

    Ok(Reading::from_json_object(kind, object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment_output() {
        let stdout = r#"{"pressure":1013.2,"humidity":41.0,"temp":22.5,"pitch":1.0,"roll":2.0,"yaw":3.0,"acc_x":0.01,"acc_y":-0.02,"acc_z":0.98}"#;
        let reading = parse_output(SourceKind::Environment, stdout).unwrap();
        assert!(reading.validate().is_ok());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_output(SourceKind::System, "[1, 2]"),
            Err(SourceError::Malformed(_))
        ));
        assert!(parse_output(SourceKind::System, "volt=0.85V").is_err());
    }
}
