//! Chainprobe - round-trip liveness probe for Matrix homeservers
//!
//! One account sends a uniquely tagged message into a room, a second account
//! (possibly on another homeserver) must observe it before a timeout. Every
//! failure met along the way is folded into a monitoring-plugin style result.

pub mod ledger;
pub mod probe;
pub mod report;
pub mod session;
pub mod severity;
pub mod token;

// Re-export main types
pub use ledger::{Ledger, Observation};
pub use probe::{Outcome, ProbeConfig, ProbeReport, ProbeState, run_probe};
pub use report::{Rendered, exit_with, render};
pub use session::{Connector, Credentials, RoomMessage, Session, SessionError};
pub use session::matrix::{MatrixConnector, MatrixSession};
pub use severity::{Severity, SeverityPolicy};
pub use token::ProbeToken;

/// Re-export common error types
pub use anyhow;

/// Chainprobe result type using anyhow for error handling
pub type Result<T> = anyhow::Result<T>;

/// Message shown when a run produced no observation at all
pub const DEFAULT_MESSAGE: &str = "checked";

/// Default probe timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
