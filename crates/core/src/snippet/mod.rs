//! Human-gated execution of generated payloads.
//!
//! A payload is proposed into a conversation thread, waits for `confirm`, `cancel` or
//! `extend`, and is either executed once or discarded. Two background tickers watch the
//! live set: the watchdog nags (and optionally terminates the process), the reaper expires.

pub mod command;
pub mod executor;
pub mod lifecycle;
pub mod reaper;
pub mod store;
pub mod watchdog;

pub use command::SnippetCommand;
pub use executor::{ExecError, ExecutionOutcome, OutputCapture, PayloadRunner, ShellRunner, SnippetExecutor};
pub use lifecycle::{AdmissionError, CommandOutcome, LifecycleManager};
pub use reaper::ExpiryReaper;
pub use store::{SnippetStore, Transition};
pub use watchdog::{ProcessTerminator, RecordingTerminator, Terminator, WatchdogReport, WatchdogScheduler};

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate_for_display(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}

/// "5 minutes", "1 minute", "90 seconds".
pub(crate) fn describe_secs(secs: u64) -> String {
    match secs {
        60 => "1 minute".to_owned(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_owned(),
        s => format!("{s} seconds"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_display("héllo", 2), "hé...");
        assert_eq!(truncate_for_display("short", 10), "short");
        assert_eq!(truncate_for_display("exact", 5), "exact");
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_secs(300), "5 minutes");
        assert_eq!(describe_secs(60), "1 minute");
        assert_eq!(describe_secs(90), "90 seconds");
        assert_eq!(describe_secs(1), "1 second");
    }
}
