//! Terminal-status detection over streamed task output.
//!
//! The backend reports the end of a task only through human-readable `info`
//! lines, so completion is recognised by exact, case-sensitive substring
//! matching against configured phrases. This is fragile: a reworded backend
//! message silently leaves the task running. Frames that carry a structured
//! `status` field bypass the phrase match entirely.

use crate::{LogMessage, LogStream, TaskStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const FINISHED_PHRASE: &str = "operation finished";
pub const ABORTED_PHRASE: &str = "interrupted by operator";
const BACKEND_FINISHED_PHRASE: &str = "Команда завершена";
const BACKEND_ABORTED_PHRASE: &str = "Прервано пользователем";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalPhrases {
    pub finished: Vec<String>,
    pub aborted: Vec<String>,
}

impl Default for TerminalPhrases {
    fn default() -> Self {
        Self {
            finished: vec![
                FINISHED_PHRASE.to_string(),
                BACKEND_FINISHED_PHRASE.to_string(),
            ],
            aborted: vec![
                ABORTED_PHRASE.to_string(),
                BACKEND_ABORTED_PHRASE.to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Aborted,
    Failed,
}

impl TerminalOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TerminalOutcome::Completed => TaskStatus::Completed,
            TerminalOutcome::Aborted => TaskStatus::Aborted,
            TerminalOutcome::Failed => TaskStatus::Failed,
        }
    }

    fn from_status(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::Completed => Some(TerminalOutcome::Completed),
            TaskStatus::Aborted => Some(TerminalOutcome::Aborted),
            TaskStatus::Failed => Some(TerminalOutcome::Failed),
            TaskStatus::Pending | TaskStatus::Running => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusInferencer {
    phrases: TerminalPhrases,
}

impl StatusInferencer {
    pub fn new(phrases: TerminalPhrases) -> Self {
        Self { phrases }
    }

    pub fn phrases(&self) -> &TerminalPhrases {
        &self.phrases
    }

    pub fn infer(&self, message: &LogMessage) -> Option<TerminalOutcome> {
        if let Some(status) = message.status {
            return TerminalOutcome::from_status(status);
        }
        if message.channel != LogStream::Info {
            return None;
        }
        let text = message.text.as_str();
        if contains_any(text, &self.phrases.aborted) {
            return Some(TerminalOutcome::Aborted);
        }
        if contains_any(text, &self.phrases.finished) {
            return Some(TerminalOutcome::Completed);
        }
        None
    }
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases
        .iter()
        .any(|phrase| !phrase.is_empty() && text.contains(phrase.as_str()))
}

/// The remote exit status the backend appends to its finished line, if any.
/// Informational only: a finished line completes the task whatever it says.
pub fn exit_code(message: &LogMessage) -> Option<i64> {
    static EXIT_CODE: OnceLock<Regex> = OnceLock::new();
    let pattern = EXIT_CODE.get_or_init(|| Regex::new(r"exit=(-?[0-9]+)").expect("valid regex"));
    pattern
        .captures(&message.text)
        .and_then(|captures| captures.get(1))
        .and_then(|code| code.as_str().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inferencer() -> StatusInferencer {
        StatusInferencer::default()
    }

    #[test]
    fn finished_phrase_completes() {
        let outcome = inferencer().infer(&LogMessage::info("[+] operation finished"));
        assert_eq!(outcome, Some(TerminalOutcome::Completed));
    }

    #[test]
    fn interrupted_phrase_aborts() {
        let outcome = inferencer().infer(&LogMessage::info("[!] interrupted by operator"));
        assert_eq!(outcome, Some(TerminalOutcome::Aborted));
    }

    #[test]
    fn backend_phrases_are_recognised() {
        let inferencer = inferencer();
        assert_eq!(
            inferencer.infer(&LogMessage::info("[+] Команда завершена (exit=0)")),
            Some(TerminalOutcome::Completed)
        );
        assert_eq!(
            inferencer.infer(&LogMessage::info("[!] Прервано пользователем")),
            Some(TerminalOutcome::Aborted)
        );
    }

    #[test]
    fn finished_line_completes_whatever_the_exit_code() {
        let inferencer = inferencer();
        let failed_exit = LogMessage::info("[+] Команда завершена (exit=1)");
        assert_eq!(inferencer.infer(&failed_exit), Some(TerminalOutcome::Completed));
        assert_eq!(exit_code(&failed_exit), Some(1));

        let no_code = LogMessage::info("operation finished (exit=None)");
        assert_eq!(inferencer.infer(&no_code), Some(TerminalOutcome::Completed));
        assert_eq!(exit_code(&no_code), None);
    }

    #[test]
    fn failure_comes_only_from_structured_status() {
        let mut message = LogMessage::info("[+] Команда завершена (exit=2)");
        message.status = Some(TaskStatus::Failed);
        assert_eq!(inferencer().infer(&message), Some(TerminalOutcome::Failed));
    }

    #[test]
    fn matching_is_case_sensitive_and_info_only() {
        let inferencer = inferencer();
        assert_eq!(
            inferencer.infer(&LogMessage::info("Operation Finished")),
            None
        );
        assert_eq!(
            inferencer.infer(&LogMessage::new(LogStream::Out, "operation finished")),
            None
        );
        assert_eq!(
            inferencer.infer(&LogMessage::new(LogStream::Err, "interrupted by operator")),
            None
        );
    }

    #[test]
    fn structured_status_wins_over_text() {
        let mut message = LogMessage::new(LogStream::Out, "operation finished");
        message.status = Some(TaskStatus::Aborted);
        assert_eq!(inferencer().infer(&message), Some(TerminalOutcome::Aborted));
    }

    #[test]
    fn custom_phrases_replace_defaults() {
        let inferencer = StatusInferencer::new(TerminalPhrases {
            finished: vec!["scan done".to_string()],
            aborted: vec![String::new()],
        });
        assert_eq!(
            inferencer.infer(&LogMessage::info("scan done")),
            Some(TerminalOutcome::Completed)
        );
        assert_eq!(inferencer.infer(&LogMessage::info("operation finished")), None);
        assert_eq!(inferencer.infer(&LogMessage::info("anything")), None);
    }
}
