use crate::{Session, Task};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Affordance {
    Check,
    Connect,
    TestLidar,
    TestEngine,
    Start,
    Stop,
    Download,
}

impl Affordance {
    pub const ALL: [Affordance; 7] = [
        Affordance::Check,
        Affordance::Connect,
        Affordance::TestLidar,
        Affordance::TestEngine,
        Affordance::Start,
        Affordance::Stop,
        Affordance::Download,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Affordance::Check => "check",
            Affordance::Connect => "connect",
            Affordance::TestLidar => "test-lidar",
            Affordance::TestEngine => "test-engine",
            Affordance::Start => "start",
            Affordance::Stop => "stop",
            Affordance::Download => "download",
        }
    }
}

impl fmt::Display for Affordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enabled/disabled state of every operator control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Affordances {
    pub check: bool,
    pub connect: bool,
    pub test_lidar: bool,
    pub test_engine: bool,
    pub start: bool,
    pub stop: bool,
    pub download: bool,
}

impl Affordances {
    /// Projects session and current task onto the control set.
    pub fn project(session: &Session, task: Option<&Task>) -> Self {
        let mut out = Affordances {
            check: true,
            connect: true,
            ..Affordances::default()
        };
        if !session.connected {
            return out;
        }
        match task {
            Some(task) if !task.status().is_terminal() => {
                out.stop = !task.stop_requested;
            }
            Some(task) => {
                out.enable_launchers();
                out.download = task.produced_filename().is_some();
            }
            None => out.enable_launchers(),
        }
        out
    }

    fn enable_launchers(&mut self) {
        self.test_lidar = true;
        self.test_engine = true;
        self.start = true;
    }

    pub fn is_enabled(&self, affordance: Affordance) -> bool {
        match affordance {
            Affordance::Check => self.check,
            Affordance::Connect => self.connect,
            Affordance::TestLidar => self.test_lidar,
            Affordance::TestEngine => self.test_engine,
            Affordance::Start => self.start,
            Affordance::Stop => self.stop,
            Affordance::Download => self.download,
        }
    }

    pub fn without(mut self, affordance: Affordance) -> Self {
        match affordance {
            Affordance::Check => self.check = false,
            Affordance::Connect => self.connect = false,
            Affordance::TestLidar => self.test_lidar = false,
            Affordance::TestEngine => self.test_engine = false,
            Affordance::Start => self.start = false,
            Affordance::Stop => self.stop = false,
            Affordance::Download => self.download = false,
        }
        self
    }

    pub fn enabled(&self) -> Vec<Affordance> {
        Affordance::ALL
            .into_iter()
            .filter(|affordance| self.is_enabled(*affordance))
            .collect()
    }
}

impl fmt::Display for Affordances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.enabled().iter().map(Affordance::as_str).collect();
        if names.is_empty() {
            return f.write_str("(none)");
        }
        f.write_str(&names.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskKind, TaskStatus};

    const CONNECTED: Session = Session { connected: true };

    fn scan(status: TaskStatus, filename: Option<&str>) -> Task {
        let mut task = Task::new("T1", TaskKind::StartScan)
            .with_promised_filename(filename.map(str::to_string));
        if status != TaskStatus::Pending {
            task.advance(status);
        }
        task
    }

    #[test]
    fn disconnected_only_allows_check_and_connect() {
        let running = scan(TaskStatus::Running, Some("scan1.bin"));
        for task in [None, Some(&running)] {
            let out = Affordances::project(&Session::default(), task);
            assert_eq!(out.enabled(), vec![Affordance::Check, Affordance::Connect]);
        }
    }

    #[test]
    fn connected_idle_enables_launchers() {
        let out = Affordances::project(&CONNECTED, None);
        assert!(out.test_lidar && out.test_engine && out.start);
        assert!(!out.stop);
        assert!(!out.download);
    }

    #[test]
    fn running_task_enables_only_stop() {
        for status in [TaskStatus::Pending, TaskStatus::Running] {
            let task = scan(status, Some("scan1.bin"));
            let out = Affordances::project(&CONNECTED, Some(&task));
            assert_eq!(
                out.enabled(),
                vec![Affordance::Check, Affordance::Connect, Affordance::Stop]
            );
        }
    }

    #[test]
    fn stop_stays_disabled_after_stop_request() {
        let mut task = scan(TaskStatus::Running, None);
        task.stop_requested = true;
        let out = Affordances::project(&CONNECTED, Some(&task));
        assert!(!out.stop);
        assert!(!out.start);
    }

    #[test]
    fn download_requires_completed_scan_with_filename() {
        let cases = [
            (scan(TaskStatus::Completed, Some("scan1.bin")), true),
            (scan(TaskStatus::Completed, None), false),
            (scan(TaskStatus::Aborted, Some("scan1.bin")), false),
            (scan(TaskStatus::Failed, Some("scan1.bin")), false),
        ];
        for (task, expected) in cases {
            let out = Affordances::project(&CONNECTED, Some(&task));
            assert_eq!(out.download, expected, "status {}", task.status());
            assert!(out.start);
            assert!(!out.stop);
        }

        let mut diagnostic = Task::new("T2", TaskKind::DiagnosticLidar)
            .with_promised_filename(Some("scan1.bin".to_string()));
        diagnostic.advance(TaskStatus::Completed);
        assert!(!Affordances::project(&CONNECTED, Some(&diagnostic)).download);
    }

    #[test]
    fn display_lists_enabled_controls() {
        let out = Affordances::project(&CONNECTED, None).without(Affordance::Start);
        assert_eq!(out.to_string(), "check connect test-lidar test-engine");
        assert_eq!(Affordances::default().to_string(), "(none)");
    }
}
