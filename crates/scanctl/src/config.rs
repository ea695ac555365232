use crate::request::DEFAULT_REQUEST_TIMEOUT_SECS;
use clap::Parser;
use scanctl_core::TerminalPhrases;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::warn;
use url::Url;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
const DEFAULT_LOG_DIR: &str = ".scanctl/logs";
const DEFAULT_CONFIG_PATH: &str = "scanctl.toml";

#[derive(Parser, Debug, Default)]
#[command(name = "scanctl", about = "Operator console for a remote lidar scanning rig")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub backend_url: String,
    #[arg(long, default_value = "")]
    pub download_dir: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value = "")]
    pub config: String,
    #[arg(long, default_value = "")]
    pub session: String,
    /// Per-request timeout in seconds.
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub session_id: String,
    pub backend_url: Url,
    pub download_dir: PathBuf,
    pub config_path: PathBuf,
    pub request_timeout: Duration,
    pub log_dir: String,
    pub log_stderr: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend url {url}: {reason}")]
    BackendUrl { url: String, reason: String },
    #[error("invalid request timeout {0}")]
    RequestTimeout(String),
}

/// Settings read from the optional TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub phrases: TerminalPhrases,
}

pub fn load_config(args: Args) -> Result<RuntimeConfig, ConfigError> {
    let backend_url = resolve_backend_url(&args.backend_url)?;
    let request_timeout = resolve_request_timeout(args.request_timeout)?;
    Ok(RuntimeConfig {
        session_id: resolve_session_id(&args.session),
        backend_url,
        download_dir: PathBuf::from(resolve_value(
            &args.download_dir,
            "SCANCTL_DOWNLOAD_DIR",
            DEFAULT_DOWNLOAD_DIR,
        )),
        config_path: PathBuf::from(resolve_value(
            &args.config,
            "SCANCTL_CONFIG_PATH",
            DEFAULT_CONFIG_PATH,
        )),
        request_timeout,
        log_dir: resolve_value(&args.log_dir, "SCANCTL_LOG_DIR", DEFAULT_LOG_DIR),
        log_stderr: resolve_log_stderr(),
    })
}

/// Reads the TOML file. A missing file yields defaults; an unreadable or
/// malformed one is reported and yields defaults too.
pub fn load_file_config(path: &Path) -> FileConfig {
    if !path.exists() {
        return FileConfig::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("config_read_error: {}: {err}", path.display());
            return FileConfig::default();
        }
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            warn!("config_parse_error: {}: {err}", path.display());
            FileConfig::default()
        }
    }
}

fn resolve_value(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = env::var(env_key) {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    default.to_string()
}

fn resolve_backend_url(flag: &str) -> Result<Url, ConfigError> {
    let raw = resolve_value(flag, "SCANCTL_BACKEND_URL", DEFAULT_BACKEND_URL);
    let url = Url::parse(&raw).map_err(|err| ConfigError::BackendUrl {
        url: raw.clone(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::BackendUrl {
            url: raw,
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn resolve_request_timeout(flag: Option<u64>) -> Result<Duration, ConfigError> {
    let secs = match flag {
        Some(secs) => secs,
        None => match env::var("SCANCTL_REQUEST_TIMEOUT") {
            Ok(value) if !value.trim().is_empty() => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::RequestTimeout(value.clone()))?,
            _ => DEFAULT_REQUEST_TIMEOUT_SECS,
        },
    };
    if secs == 0 {
        return Err(ConfigError::RequestTimeout(secs.to_string()));
    }
    Ok(Duration::from_secs(secs))
}

fn resolve_session_id(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("SCANCTL_SESSION_ID") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    format!("pid-{}", std::process::id())
}

fn resolve_log_stderr() -> bool {
    env::var("SCANCTL_LOG_STDERR")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(false)
}

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}
