//! Ordered record of everything a probe run observed.

use crate::severity::Severity;

/// One fact discovered during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub severity: Severity,
    pub message: String,
}

impl Observation {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, message)
    }
}

/// Append-only list of observations in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    observations: Vec<Observation>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn record(&mut self, severity: Severity, message: impl Into<String>) {
        self.push(Observation::new(severity, message));
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Worst severity recorded, `Ok` when nothing was recorded
    pub fn worst(&self) -> Severity {
        self.observations.iter().map(|o| o.severity).max().unwrap_or_default()
    }

    pub fn contains(&self, severity: Severity) -> bool {
        self.observations.iter().any(|o| o.severity == severity)
    }

    /// Guarantees the reporter always has at least one line to print.
    pub fn ensure_not_empty(&mut self, default_message: &str) {
        if self.observations.is_empty() {
            self.push(Observation::ok(default_message));
        }
    }

    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }
}

impl Extend<Observation> for Ledger {
    fn extend<T: IntoIterator<Item = Observation>>(&mut self, iter: T) {
        self.observations.extend(iter);
    }
}

impl FromIterator<Observation> for Ledger {
    fn from_iter<T: IntoIterator<Item = Observation>>(iter: T) -> Self {
        Self { observations: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ledger_is_ok() {
        let ledger = Ledger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.worst(), Severity::Ok);
    }

    #[test]
    fn test_worst_ignores_insertion_order() {
        let forward: Ledger = [
            Observation::ok("fine"),
            Observation::new(Severity::Critical, "bad"),
            Observation::new(Severity::Warning, "meh"),
        ]
        .into_iter()
        .collect();
        let mut backward = forward.clone().into_observations();
        backward.reverse();
        let backward: Ledger = backward.into_iter().collect();

        assert_eq!(forward.worst(), Severity::Critical);
        assert_eq!(backward.worst(), Severity::Critical);
    }

    #[test]
    fn test_higher_severity_never_lowers_result() {
        let mut ledger = Ledger::new();
        let mut previous = ledger.worst();
        for severity in [Severity::Warning, Severity::Ok, Severity::Unknown, Severity::Critical] {
            ledger.record(severity, "x");
            assert!(ledger.worst() >= previous);
            previous = ledger.worst();
        }
        assert_eq!(ledger.worst(), Severity::Unknown);
    }

    #[test]
    fn test_ensure_not_empty_only_fills_empty_ledger() {
        let mut ledger = Ledger::new();
        ledger.ensure_not_empty("checked");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().map(|o| o.message.as_str()), Some("checked"));

        ledger.ensure_not_empty("again");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_preserves_discovery_order() {
        let mut ledger = Ledger::new();
        ledger.record(Severity::Critical, "first");
        ledger.extend([Observation::ok("second"), Observation::ok("third")]);
        let messages: Vec<_> = ledger.iter().map(|o| o.message.clone()).collect();
        assert_eq!(messages, ["first", "second", "third"]);
    }
}
