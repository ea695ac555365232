use crate::TaskStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ERROR_PREFIX: &str = "ERR: ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Out,
    Err,
    Info,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Out => "out",
            LogStream::Err => "err",
            LogStream::Info => "info",
        }
    }

    fn from_wire(kind: &str) -> Self {
        match kind.trim() {
            "err" => LogStream::Err,
            "info" => LogStream::Info,
            _ => LogStream::Out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub channel: LogStream,
    pub text: String,
    /// Structured terminal status, when the backend sends one.
    pub status: Option<TaskStatus>,
}

impl LogMessage {
    pub fn new(channel: LogStream, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            status: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogStream::Info, text)
    }

    pub fn display_line(&self) -> String {
        match self.channel {
            LogStream::Err => format!("{ERROR_PREFIX}{}", self.text),
            LogStream::Out | LogStream::Info => self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type", default)]
    kind: String,
    text: String,
    #[serde(default)]
    status: Option<String>,
}

pub fn decode_log_frame(raw: &str) -> Result<LogMessage, FrameError> {
    let frame: WireFrame =
        serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    Ok(LogMessage {
        channel: LogStream::from_wire(&frame.kind),
        text: frame.text,
        status: frame
            .status
            .as_deref()
            .and_then(|value| value.parse::<TaskStatus>().ok())
            .filter(TaskStatus::is_terminal),
    })
}

/// A frame as delivered to the controller: structured when it parsed,
/// otherwise the verbatim text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Message(LogMessage),
    Raw(String),
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Self {
        match decode_log_frame(raw) {
            Ok(message) => InboundFrame::Message(message),
            Err(_) => InboundFrame::Raw(raw.to_string()),
        }
    }

    pub fn display_line(&self) -> String {
        match self {
            InboundFrame::Message(message) => message.display_line(),
            InboundFrame::Raw(text) => text.clone(),
        }
    }

    pub fn message(&self) -> Option<&LogMessage> {
        match self {
            InboundFrame::Message(message) => Some(message),
            InboundFrame::Raw(_) => None,
        }
    }
}
