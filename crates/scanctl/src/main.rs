use clap::Parser;
use scanctl::config::{load_config, Args};
use scanctl::{console, logging};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match load_config(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config_error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let _session_log = logging::init_logging(&config);
    if let Err(err) = console::run(config).await {
        error!("console_error: {err}");
        eprintln!("scanctl: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
