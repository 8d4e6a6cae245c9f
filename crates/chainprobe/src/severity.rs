//! Monitoring-plugin severities and the policy mapping probe failures onto them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a check, ordered from best to worst.
///
/// The discriminant is the process exit code expected by monitoring systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl Severity {
    pub fn exit_code(self) -> i32 {
        self as i32
    }

    /// Upper-case label used in plugin output
    pub fn label(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity '{0}' (expected ok, warning, critical, unknown or 0-3)")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "0" => Ok(Severity::Ok),
            "warning" | "warn" | "1" => Ok(Severity::Warning),
            "critical" | "crit" | "2" => Ok(Severity::Critical),
            "unknown" | "3" => Ok(Severity::Unknown),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Which severity each class of probe failure is reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityPolicy {
    /// Unreachable homeserver, rejected login or failed send
    pub setup_failure: Severity,

    /// Probe message not observed before the timeout
    pub timeout: Severity,

    /// Mark-read or sync failures while waiting for the message
    pub runtime_failure: Severity,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            setup_failure: Severity::Unknown,
            timeout: Severity::Critical,
            runtime_failure: Severity::Unknown,
        }
    }
}
