use chrono::Utc;

/// Prefix used by earlier versions of the check, kept so existing room filters still work
pub const DEFAULT_PREFIX: &str = "chainTestText";

/// Per-run correlation string carried in the probe message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeToken {
    body: String,
}

impl ProbeToken {
    /// Build a token from the current UTC time in nanoseconds
    pub fn generate(prefix: &str) -> Self {
        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
        Self { body: format!("{prefix}{nanos}") }
    }

    /// Exact message body to send
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn matches(&self, body: &str) -> bool {
        self.body == body
    }
}
