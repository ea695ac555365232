use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use scanctl_core::api::LOG_STREAM_SEGMENTS;
use scanctl_core::{ChannelError, InboundFrame};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// Events produced by a log channel, tagged with the task it was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { task_id: String },
    Frame { task_id: String, frame: InboundFrame },
    Closed { task_id: String },
    Failed { task_id: String, error: ChannelError },
}

impl ChannelEvent {
    pub fn task_id(&self) -> &str {
        match self {
            ChannelEvent::Opened { task_id }
            | ChannelEvent::Frame { task_id, .. }
            | ChannelEvent::Closed { task_id }
            | ChannelEvent::Failed { task_id, .. } => task_id,
        }
    }
}

pub type ChannelEvents = mpsc::UnboundedSender<ChannelEvent>;

pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// A live log stream. Dropping it stops the stream without waiting.
#[async_trait]
pub trait LiveChannel: Send {
    fn task_id(&self) -> &str;

    /// Stops the stream and returns once its reader has finished, so every
    /// event it will ever emit is already queued.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(
        &self,
        task_id: &str,
        events: ChannelEvents,
    ) -> Result<Box<dyn LiveChannel>, ChannelError>;
}

#[derive(Debug, Clone)]
pub struct WsChannelFactory {
    base_url: Url,
    handshake_timeout: Duration,
}

impl WsChannelFactory {
    pub fn new(backend_url: &Url) -> Result<Self, ChannelError> {
        let mut base_url = backend_url.clone();
        let scheme = match backend_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ChannelError::Url(format!("unsupported scheme {other}"))),
        };
        base_url
            .set_scheme(scheme)
            .map_err(|_| ChannelError::Url(format!("cannot derive {scheme} url from {backend_url}")))?;
        Ok(Self {
            base_url,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Stream URL for a task; the id is percent-encoded as a single segment.
    pub fn url_for(&self, task_id: &str) -> Result<Url, ChannelError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Url(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(LOG_STREAM_SEGMENTS)
            .push(task_id);
        Ok(url)
    }
}

#[async_trait]
impl ChannelFactory for WsChannelFactory {
    async fn open(
        &self,
        task_id: &str,
        events: ChannelEvents,
    ) -> Result<Box<dyn LiveChannel>, ChannelError> {
        let url = self.url_for(task_id)?;
        debug!("channel_open: {url}");
        let handshake = tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str()));
        let (ws, _) = match handshake.await {
            Ok(connected) => connected.map_err(|err| ChannelError::Connect(err.to_string()))?,
            Err(_) => {
                return Err(ChannelError::Connect(format!(
                    "handshake timed out after {}s",
                    self.handshake_timeout.as_secs_f32()
                )))
            }
        };
        let _ = events.send(ChannelEvent::Opened {
            task_id: task_id.to_string(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reader = tokio::spawn(pump(task_id.to_string(), ws, shutdown_rx, events));
        Ok(Box::new(WsLogChannel {
            task_id: task_id.to_string(),
            shutdown: Some(shutdown_tx),
            reader: Some(reader),
        }))
    }
}

pub struct WsLogChannel {
    task_id: String,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl LiveChannel for WsLogChannel {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    async fn close(mut self: Box<Self>) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                warn!("channel_reader_join_error: {err}");
            }
        }
    }
}

async fn pump(
    task_id: String,
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut shutdown: oneshot::Receiver<()>,
    events: ChannelEvents,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = ws.close(None).await;
                let _ = events.send(ChannelEvent::Closed { task_id });
                return;
            }
            next = ws.next() => {
                let text = match next {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = events.send(ChannelEvent::Closed { task_id });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!("channel_read_error: {err}");
                        let _ = events.send(ChannelEvent::Failed {
                            task_id,
                            error: ChannelError::Transport(err.to_string()),
                        });
                        return;
                    }
                };
                let frame = InboundFrame::parse(&text);
                if let InboundFrame::Raw(_) = &frame {
                    debug!("frame_not_structured: task={task_id}");
                }
                if events
                    .send(ChannelEvent::Frame {
                        task_id: task_id.clone(),
                        frame,
                    })
                    .is_err()
                {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_follows_backend_scheme() {
        let plain = WsChannelFactory::new(&Url::parse("http://rig.local:8000").expect("url"))
            .expect("factory");
        assert_eq!(
            plain.url_for("abc").expect("url").as_str(),
            "ws://rig.local:8000/api/lidar/ws/abc"
        );

        let secure = WsChannelFactory::new(&Url::parse("https://rig.local/console/").expect("url"))
            .expect("factory");
        assert_eq!(
            secure.url_for("T1").expect("url").as_str(),
            "wss://rig.local/console/api/lidar/ws/T1"
        );
    }

    #[test]
    fn task_id_is_encoded_as_one_segment() {
        let factory = WsChannelFactory::new(&Url::parse("http://rig.local").expect("url"))
            .expect("factory");
        assert_eq!(
            factory.url_for("scan 1/../x?y").expect("url").as_str(),
            "ws://rig.local/api/lidar/ws/scan%201%2F..%2Fx%3Fy"
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let result = WsChannelFactory::new(&Url::parse("ftp://rig.local").expect("url"));
        assert!(matches!(result, Err(ChannelError::Url(_))));
    }

    #[test]
    fn event_task_id_is_exposed_for_every_variant() {
        let events = [
            ChannelEvent::Opened { task_id: "a".into() },
            ChannelEvent::Frame {
                task_id: "a".into(),
                frame: InboundFrame::Raw("x".into()),
            },
            ChannelEvent::Closed { task_id: "a".into() },
            ChannelEvent::Failed {
                task_id: "a".into(),
                error: ChannelError::Transport("reset".into()),
            },
        ];
        assert!(events.iter().all(|event| event.task_id() == "a"));
    }
}
