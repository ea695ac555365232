use thiserror::Error;

/// A backend call that failed or answered with a non-success status. Carries
/// the raw response body, or the status code when the body was empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status_or_message}")]
pub struct RequestError {
    pub status_or_message: String,
}

impl RequestError {
    pub fn new(status_or_message: impl Into<String>) -> Self {
        Self {
            status_or_message: status_or_message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("not connected")]
    NotConnected,
    #[error("no active task")]
    NoActiveTask,
    #[error("task {task_id} is still running")]
    TaskActive { task_id: String },
    #[error("no file to download")]
    NothingToDownload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid channel url: {0}")]
    Url(String),
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("channel transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("{0}")]
    Channel(#[from] ChannelError),
    #[error("busy: {in_flight} still in progress")]
    Busy { in_flight: &'static str },
}
