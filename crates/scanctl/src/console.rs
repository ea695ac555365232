use crate::channel::WsChannelFactory;
use crate::config::{load_file_config, RuntimeConfig};
use crate::controller::{ControllerSettings, Diagnostic, SessionController};
use crate::request::RequestClient;
use scanctl_core::{ControllerError, ScanParams, StatusInferencer};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HELP: &str = "\
commands:
  check                                         ping the rig
  connect                                       open a session
  test-lidar | test-engine                      run a diagnostic
  start <range> <step> <duration> <pulse_delay> start a scan
  stop                                          stop the current task
  download                                      save the finished scan
  status                                        show session and task
  help                                          show this text
  quit                                          exit";

const START_USAGE: &str = "usage: start <range> <step> <duration> <pulse_delay>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Check,
    Connect,
    TestLidar,
    TestEngine,
    Start(ScanParams),
    Stop,
    Download,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut words = value.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();
        let command = match head.to_ascii_lowercase().as_str() {
            "check" | "ping" => Command::Check,
            "connect" => Command::Connect,
            "test-lidar" => Command::TestLidar,
            "test-engine" => Command::TestEngine,
            "start" => match args.as_slice() {
                [range, step, duration, pulse_delay] => {
                    return Ok(Command::Start(ScanParams::new(
                        *range,
                        *step,
                        *duration,
                        *pulse_delay,
                    )))
                }
                _ => return Err(START_USAGE.to_string()),
            },
            "stop" => Command::Stop,
            "download" => Command::Download,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}' (try help)")),
        };
        if !args.is_empty() {
            return Err(format!("{head} takes no arguments"));
        }
        Ok(command)
    }
}

/// Runs the interactive console until quit or end of input.
pub async fn run(config: RuntimeConfig) -> Result<(), ControllerError> {
    let requests = RequestClient::new(&config.backend_url, config.request_timeout)?;
    let channels = WsChannelFactory::new(&config.backend_url)?
        .with_handshake_timeout(config.request_timeout);
    let file_config = load_file_config(&config.config_path);
    let inferencer = StatusInferencer::new(file_config.phrases);
    debug!(
        "terminal_phrases: finished={:?} aborted={:?}",
        inferencer.phrases().finished,
        inferencer.phrases().aborted
    );
    let settings = ControllerSettings {
        inferencer,
        download_dir: config.download_dir.clone(),
    };
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
    let controller = Arc::new(SessionController::new(
        Arc::new(requests),
        Arc::new(channels),
        settings,
        event_tx,
        log_tx,
    ));
    info!(
        "console_start: session={} backend={}",
        config.session_id, config.backend_url
    );

    let mut controls = controller.subscribe_affordances();
    println!("scanctl: backend {} (type help)", config.backend_url);
    println!("controls: {}", *controls.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&controller, &line) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("stdin_error: {err}");
                        break;
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                controller.apply_channel_event(event);
            }
            Some(line) = log_rx.recv() => {
                println!("{}", line.trim_end());
            }
            changed = controls.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("controls: {}", *controls.borrow_and_update());
            }
        }
    }

    controller.shutdown().await;
    while let Ok(event) = event_rx.try_recv() {
        controller.apply_channel_event(event);
    }
    while let Ok(line) = log_rx.try_recv() {
        println!("{}", line.trim_end());
    }
    info!("console_stop: session={}", config.session_id);
    Ok(())
}

/// Returns false when the console should exit.
fn handle_line(controller: &Arc<SessionController>, line: &str) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(message) => {
            println!("{message}");
            return true;
        }
    };
    let controller = Arc::clone(controller);
    match command {
        Command::Check => {
            tokio::spawn(async move {
                let _ = controller.check_connection().await;
            });
        }
        Command::Connect => {
            tokio::spawn(async move {
                let _ = controller.connect().await;
            });
        }
        Command::TestLidar => {
            tokio::spawn(async move {
                let _ = controller.run_diagnostic(Diagnostic::Lidar).await;
            });
        }
        Command::TestEngine => {
            tokio::spawn(async move {
                let _ = controller.run_diagnostic(Diagnostic::Engine).await;
            });
        }
        Command::Start(params) => {
            tokio::spawn(async move {
                let _ = controller.start_scan(params).await;
            });
        }
        Command::Stop => {
            tokio::spawn(async move {
                let _ = controller.stop_scan().await;
            });
        }
        Command::Download => {
            tokio::spawn(async move {
                let _ = controller.download().await;
            });
        }
        Command::Status => println!("{}", status_line(&controller)),
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn status_line(controller: &SessionController) -> String {
    let task = match controller.current_task() {
        Some(task) => {
            let mut line = format!("task {} ({}) {}", task.id, task.kind, task.status());
            if let Some(name) = task.promised_filename() {
                line.push_str(&format!(" file={name}"));
            }
            if task.stop_requested && !task.status().is_terminal() {
                line.push_str(" stop requested");
            }
            line
        }
        None => "no task".to_string(),
    };
    format!(
        "state: {} | {task} | controls: {}",
        controller.state().as_str(),
        controller.affordances()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands_case_insensitively() {
        assert_eq!("check".parse::<Command>(), Ok(Command::Check));
        assert_eq!("  CONNECT ".parse::<Command>(), Ok(Command::Connect));
        assert_eq!("Test-Lidar".parse::<Command>(), Ok(Command::TestLidar));
        assert_eq!("test-engine".parse::<Command>(), Ok(Command::TestEngine));
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("download".parse::<Command>(), Ok(Command::Download));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn start_takes_four_values_verbatim() {
        assert_eq!(
            "start 90 0.5 10 200".parse::<Command>(),
            Ok(Command::Start(ScanParams::new("90", "0.5", "10", "200")))
        );
        assert_eq!(
            "start 90 0.5".parse::<Command>(),
            Err(START_USAGE.to_string())
        );
    }

    #[test]
    fn rejects_unknown_commands_and_stray_arguments() {
        let unknown = "scan".parse::<Command>().expect_err("unknown");
        assert!(unknown.contains("unknown command 'scan'"));
        let stray = "stop now".parse::<Command>().expect_err("stray");
        assert_eq!(stray, "stop takes no arguments");
        assert!("   ".parse::<Command>().is_err());
    }
}
