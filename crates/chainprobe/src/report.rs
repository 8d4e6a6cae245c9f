//! Monitoring plugin output.
//!
//! ```text
//! CRITICAL: Message was not received within 10s
//! CRITICAL: Message was not received within 10s
//! UNKNOWN: Could not mark message as read
//! ```
//!
//! The first line summarises the worst severity, every following line is one
//! observation in the order it was recorded.

use std::io::{self, Write};

use crate::ledger::Ledger;
use crate::severity::Severity;

/// Plugin output ready to be printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub severity: Severity,
    pub text: String,
}

/// Reduce a ledger to its worst severity and the plugin text.
pub fn render(ledger: &Ledger, default_message: &str) -> Rendered {
    let severity = ledger.worst();

    let worst_messages: Vec<&str> = ledger
        .iter()
        .filter(|o| o.severity == severity)
        .map(|o| o.message.as_str())
        .collect();
    let summary =
        if worst_messages.is_empty() { default_message.to_string() } else { worst_messages.join(", ") };

    let mut text = format!("{}: {}", severity.label(), summary);
    for observation in ledger.iter() {
        text.push('\n');
        text.push_str(observation.severity.label());
        text.push_str(": ");
        text.push_str(&observation.message);
    }

    Rendered { severity, text }
}

/// Print the result to stdout and terminate with the matching exit code.
pub fn exit_with(mut ledger: Ledger) -> ! {
    ledger.ensure_not_empty(crate::DEFAULT_MESSAGE);
    let rendered = render(&ledger, crate::DEFAULT_MESSAGE);

    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", rendered.text);
    let _ = stdout.flush();

    std::process::exit(rendered.severity.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Observation;

    #[test]
    fn test_render_success() {
        let mut ledger = Ledger::new();
        ledger.push(Observation::ok("The chain check was successful (1.0s)"));

        let rendered = render(&ledger, "checked");
        assert_eq!(rendered.severity, Severity::Ok);
        assert_eq!(
            rendered.text,
            "OK: The chain check was successful (1.0s)\nOK: The chain check was successful (1.0s)"
        );
    }

    #[test]
    fn test_summary_lists_only_worst_messages() {
        let mut ledger = Ledger::new();
        ledger.push(Observation::ok("The chain check was successful (0.4s)"));
        ledger.record(Severity::Unknown, "Could not mark message as read");
        ledger.record(Severity::Critical, "sync stopped with error");

        let rendered = render(&ledger, "checked");
        let lines: Vec<&str> = rendered.text.lines().collect();

        assert_eq!(rendered.severity, Severity::Unknown);
        assert_eq!(lines[0], "UNKNOWN: Could not mark message as read");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "OK: The chain check was successful (0.4s)");
        assert_eq!(lines[3], "CRITICAL: sync stopped with error");
    }

    #[test]
    fn test_empty_ledger_uses_default_message() {
        let rendered = render(&Ledger::new(), "checked");
        assert_eq!(rendered.severity, Severity::Ok);
        assert_eq!(rendered.text, "OK: checked");
    }

    #[test]
    fn test_same_severity_messages_are_joined() {
        let mut ledger = Ledger::new();
        ledger.record(Severity::Critical, "Message was not received within 2s");
        ledger.record(Severity::Critical, "sync stopped with error");

        let rendered = render(&ledger, "checked");
        assert_eq!(
            rendered.text.lines().next(),
            Some("CRITICAL: Message was not received within 2s, sync stopped with error")
        );
    }
}
