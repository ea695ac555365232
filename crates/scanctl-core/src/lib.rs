use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod affordances;
pub mod api;
pub mod error;
pub mod frames;
pub mod inference;

pub use affordances::{Affordance, Affordances};
pub use error::{ChannelError, ControllerError, PreconditionError, RequestError};
pub use frames::{FrameError, InboundFrame, LogMessage, LogStream};
pub use inference::{StatusInferencer, TerminalOutcome, TerminalPhrases};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Ping,
    Connect,
    DiagnosticLidar,
    DiagnosticEngine,
    StartScan,
    StopScan,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Ping => "ping",
            TaskKind::Connect => "connect",
            TaskKind::DiagnosticLidar => "diagnostic_lidar",
            TaskKind::DiagnosticEngine => "diagnostic_engine",
            TaskKind::StartScan => "start_scan",
            TaskKind::StopScan => "stop_scan",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Aborted => "aborted",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Aborted | TaskStatus::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Aborted | TaskStatus::Failed => 2,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" | "done" | "finished" => Ok(TaskStatus::Completed),
            "aborted" | "cancelled" | "canceled" => Ok(TaskStatus::Aborted),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// One remote operation with a server-issued id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    status: TaskStatus,
    promised_filename: Option<String>,
    pub stop_requested: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Pending,
            promised_filename: None,
            stop_requested: false,
        }
    }

    pub fn with_promised_filename(mut self, filename: Option<String>) -> Self {
        self.promised_filename = filename.filter(|name| !name.trim().is_empty());
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn promised_filename(&self) -> Option<&str> {
        self.promised_filename.as_deref()
    }

    /// The scan artifact name, available only once a scan has completed.
    pub fn produced_filename(&self) -> Option<&str> {
        if self.kind != TaskKind::StartScan || self.status != TaskStatus::Completed {
            return None;
        }
        self.promised_filename()
    }

    /// Moves the status forward. Returns false and leaves the task untouched
    /// when `next` would not advance it.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }
}

/// The four scan values as typed by the operator; forwarded without
/// interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanParams {
    pub scan_range: String,
    pub scan_step: String,
    pub lidar_duration: String,
    pub pulse_delay: String,
}

impl ScanParams {
    pub fn new(
        scan_range: impl Into<String>,
        scan_step: impl Into<String>,
        lidar_duration: impl Into<String>,
        pulse_delay: impl Into<String>,
    ) -> Self {
        Self {
            scan_range: scan_range.into(),
            scan_step: scan_step.into(),
            lidar_duration: lidar_duration.into(),
            pulse_delay: pulse_delay.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut task = Task::new("T1", TaskKind::StartScan);
        assert!(task.advance(TaskStatus::Running));
        assert!(!task.advance(TaskStatus::Pending));
        assert!(!task.advance(TaskStatus::Running));
        assert!(task.advance(TaskStatus::Aborted));
        assert!(!task.advance(TaskStatus::Completed));
        assert_eq!(task.status(), TaskStatus::Aborted);
    }

    #[test]
    fn pending_task_may_jump_to_terminal() {
        let mut task = Task::new("T1", TaskKind::DiagnosticEngine);
        assert!(task.advance(TaskStatus::Completed));
        assert!(task.status().is_terminal());
    }

    #[test]
    fn produced_filename_requires_completed_scan() {
        let mut scan = Task::new("T1", TaskKind::StartScan)
            .with_promised_filename(Some("scan1.bin".to_string()));
        assert_eq!(scan.promised_filename(), Some("scan1.bin"));
        assert_eq!(scan.produced_filename(), None);
        scan.advance(TaskStatus::Running);
        assert_eq!(scan.produced_filename(), None);
        scan.advance(TaskStatus::Completed);
        assert_eq!(scan.produced_filename(), Some("scan1.bin"));

        let mut diagnostic = Task::new("T2", TaskKind::DiagnosticLidar)
            .with_promised_filename(Some("ignored.bin".to_string()));
        diagnostic.advance(TaskStatus::Completed);
        assert_eq!(diagnostic.produced_filename(), None);
    }

    #[test]
    fn blank_promised_filename_is_dropped() {
        let task = Task::new("T1", TaskKind::StartScan).with_promised_filename(Some("  ".into()));
        assert_eq!(task.promised_filename(), None);
    }

    #[test]
    fn status_parses_aliases() {
        assert_eq!("Finished".parse::<TaskStatus>(), Ok(TaskStatus::Completed));
        assert_eq!("canceled".parse::<TaskStatus>(), Ok(TaskStatus::Aborted));
        assert!("exploded".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn scan_params_serialize_with_backend_keys() {
        let params = ScanParams::new("10", "1", "5", "2");
        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "scan_range": "10",
                "scan_step": "1",
                "lidar_duration": "5",
                "pulse_delay": "2"
            })
        );
    }
}
