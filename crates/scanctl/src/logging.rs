use crate::config::RuntimeConfig;
use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

type SharedFile = Arc<Mutex<File>>;

/// The per-session log file, held open for the lifetime of the process.
pub struct SessionLog {
    path: Option<PathBuf>,
    file: Option<SharedFile>,
}

impl SessionLog {
    fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn sinks(&self, mirror_stderr: bool) -> Vec<Sink> {
        let mut sinks: Vec<Sink> = self.file.iter().cloned().map(Sink::File).collect();
        if mirror_stderr {
            sinks.push(Sink::Stderr);
        }
        sinks
    }
}

/// Installs the global subscriber. Stdout stays free for operator output,
/// so diagnostics go to the session log file and optionally stderr.
pub fn init_logging(config: &RuntimeConfig) -> Option<SessionLog> {
    let level = env::var("SCANCTL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let log = open_session_log(&config.log_dir, &config.session_id).unwrap_or_else(|err| {
        eprintln!("log_file_error: {err}");
        SessionLog::disabled()
    });
    let sinks = log.sinks(config.log_stderr);
    let make_writer = BoxMakeWriter::new(move || FanOut {
        sinks: sinks.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    if let Some(path) = log.path() {
        debug!("session_log: path={}", path.display());
    }
    Some(log)
}

#[derive(Clone)]
enum Sink {
    File(SharedFile),
    Stderr,
}

impl Sink {
    fn apply(&self, op: impl FnOnce(&mut dyn Write) -> io::Result<()>) {
        // A failing sink must not silence the others.
        let _ = match self {
            Sink::File(file) => op(&mut *file.lock().unwrap_or_else(PoisonError::into_inner)),
            Sink::Stderr => op(&mut io::stderr().lock()),
        };
    }
}

/// Copies every formatted event to each sink.
struct FanOut {
    sinks: Vec<Sink>,
}

impl Write for FanOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &self.sinks {
            sink.apply(|out| out.write_all(buf));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &self.sinks {
            sink.apply(|out| out.flush());
        }
        Ok(())
    }
}

fn open_session_log(log_dir: &str, session_id: &str) -> io::Result<SessionLog> {
    if log_dir.trim().is_empty() {
        return Ok(SessionLog::disabled());
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = log_file_path(&dir, session_id);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(SessionLog {
        path: Some(path),
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn log_file_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("scanctl-{}.log", sanitize_component(session_id)))
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_safe_file_components() {
        assert_eq!(sanitize_component("pid-42"), "pid-42");
        assert_eq!(sanitize_component("../rig one"), "_rig_one");
        assert_eq!(sanitize_component(".."), "session");
    }

    #[test]
    fn log_file_lands_in_log_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("nested/logs");
        let log = open_session_log(log_dir.to_str().expect("utf8 path"), "bench/2")
            .expect("open log file");
        let expected = log_dir.join("scanctl-bench_2.log");
        assert_eq!(log.path(), Some(expected.as_path()));
        assert!(expected.exists());

        let mut writer = FanOut {
            sinks: log.sinks(false),
        };
        writer.write_all(b"line\n").expect("write");
        writer.flush().expect("flush");
        assert_eq!(std::fs::read_to_string(&expected).expect("read log"), "line\n");
    }

    #[test]
    fn empty_log_dir_disables_file_logging() {
        let log = open_session_log("  ", "pid-1").expect("no file");
        assert!(log.path().is_none());
        assert!(log.sinks(false).is_empty());
        assert_eq!(log.sinks(true).len(), 1);
    }
}
