use crate::channel::{ChannelEvent, ChannelEvents, ChannelFactory, LiveChannel};
use crate::request::RequestIssuer;
use scanctl_core::api::{
    OkResponse, TaskResponse, CONNECT_PATH, DOWNLOAD_PATH, ENGINE_TEST_PATH,
    LIDAR_TEST_PATH, PING_PATH, START_PATH, STOP_PATH,
};
use scanctl_core::inference::exit_code;
use scanctl_core::{
    Affordance, Affordances, ControllerError, PreconditionError, RequestError, ScanParams,
    Session, StatusInferencer, Task, TaskKind, TaskStatus, TerminalOutcome,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Lidar,
    Engine,
}

impl Diagnostic {
    pub fn kind(&self) -> TaskKind {
        match self {
            Diagnostic::Lidar => TaskKind::DiagnosticLidar,
            Diagnostic::Engine => TaskKind::DiagnosticEngine,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Diagnostic::Lidar => LIDAR_TEST_PATH,
            Diagnostic::Engine => ENGINE_TEST_PATH,
        }
    }
}

/// Operator actions; at most one runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CheckConnection,
    Connect,
    RunDiagnostic(Diagnostic),
    StartScan,
    StopScan,
    Download,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CheckConnection => "connection check",
            Action::Connect => "connect",
            Action::RunDiagnostic(Diagnostic::Lidar) => "lidar test",
            Action::RunDiagnostic(Diagnostic::Engine) => "engine test",
            Action::StartScan => "start",
            Action::StopScan => "stop",
            Action::Download => "download",
        }
    }

    fn affordance(&self) -> Affordance {
        match self {
            Action::CheckConnection => Affordance::Check,
            Action::Connect => Affordance::Connect,
            Action::RunDiagnostic(Diagnostic::Lidar) => Affordance::TestLidar,
            Action::RunDiagnostic(Diagnostic::Engine) => Affordance::TestEngine,
            Action::StartScan => Affordance::Start,
            Action::StopScan => Affordance::Stop,
            Action::Download => Affordance::Download,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Idle,
    TaskActive,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Idle => "idle",
            SessionState::TaskActive => "task active",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub inferencer: StatusInferencer,
    pub download_dir: PathBuf,
}

#[derive(Debug, Default)]
struct ControllerState {
    session: Session,
    task: Option<Task>,
    in_flight: Option<Action>,
}

impl ControllerState {
    fn affordances(&self) -> Affordances {
        let projected = Affordances::project(&self.session, self.task.as_ref());
        match self.in_flight {
            Some(action) => projected.without(action.affordance()),
            None => projected,
        }
    }

    fn active_task_id(&self) -> Option<String> {
        self.task
            .as_ref()
            .filter(|task| !task.status().is_terminal())
            .map(|task| task.id.clone())
    }

    fn is_current(&self, task_id: &str) -> bool {
        self.task.as_ref().is_some_and(|task| task.id == task_id)
    }

    fn current_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.task.as_mut().filter(|task| task.id == task_id)
    }
}

/// Releases the in-flight slot when dropped.
struct InFlight<'a> {
    controller: &'a SessionController,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.controller.update(|state| state.in_flight = None);
    }
}

/// Drives one remote rig through connect, diagnostics and scans, and owns
/// the single live log channel.
pub struct SessionController {
    requests: Arc<dyn RequestIssuer>,
    channels: Arc<dyn ChannelFactory>,
    settings: ControllerSettings,
    events: ChannelEvents,
    operator_log: mpsc::UnboundedSender<String>,
    affordances: watch::Sender<Affordances>,
    state: Mutex<ControllerState>,
    channel: AsyncMutex<Option<Box<dyn LiveChannel>>>,
}

impl SessionController {
    pub fn new(
        requests: Arc<dyn RequestIssuer>,
        channels: Arc<dyn ChannelFactory>,
        settings: ControllerSettings,
        events: ChannelEvents,
        operator_log: mpsc::UnboundedSender<String>,
    ) -> Self {
        let state = ControllerState::default();
        let (affordances, _) = watch::channel(state.affordances());
        Self {
            requests,
            channels,
            settings,
            events,
            operator_log,
            affordances,
            state: Mutex::new(state),
            channel: AsyncMutex::new(None),
        }
    }

    pub fn session(&self) -> Session {
        self.read(|state| state.session)
    }

    pub fn current_task(&self) -> Option<Task> {
        self.read(|state| state.task.clone())
    }

    pub fn state(&self) -> SessionState {
        self.read(|state| match (&state.task, state.session.connected) {
            (_, false) => SessionState::Disconnected,
            (Some(task), true) if !task.status().is_terminal() => SessionState::TaskActive,
            _ => SessionState::Idle,
        })
    }

    pub fn affordances(&self) -> Affordances {
        *self.affordances.borrow()
    }

    pub fn subscribe_affordances(&self) -> watch::Receiver<Affordances> {
        self.affordances.subscribe()
    }

    pub async fn live_channel_task(&self) -> Option<String> {
        let slot = self.channel.lock().await;
        slot.as_ref().map(|channel| channel.task_id().to_string())
    }

    /// Pings the rig. Reports reachability only.
    pub async fn check_connection(&self) -> Result<bool, ControllerError> {
        self.guarded(Action::CheckConnection, self.ping()).await
    }

    pub async fn connect(&self) -> Result<bool, ControllerError> {
        self.guarded(Action::Connect, self.open_session()).await
    }

    /// Starts a diagnostic and then attaches its log stream. The in-flight
    /// slot is released before the stream handshake, so stop stays usable
    /// while it is pending.
    pub async fn run_diagnostic(&self, diagnostic: Diagnostic) -> Result<String, ControllerError> {
        let task_id = self
            .guarded(
                Action::RunDiagnostic(diagnostic),
                self.launch_diagnostic(diagnostic),
            )
            .await?;
        self.attach_channel(&task_id).await;
        Ok(task_id)
    }

    pub async fn start_scan(&self, params: ScanParams) -> Result<String, ControllerError> {
        let task_id = self.guarded(Action::StartScan, self.launch_scan(params)).await?;
        self.attach_channel(&task_id).await;
        Ok(task_id)
    }

    /// Asks the backend to stop the current task. The task stays running
    /// until a terminal message arrives on its channel.
    pub async fn stop_scan(&self) -> Result<(), ControllerError> {
        self.guarded(Action::StopScan, self.request_stop()).await
    }

    /// Fetches the completed scan artifact into the download directory.
    pub async fn download(&self) -> Result<PathBuf, ControllerError> {
        self.guarded(Action::Download, self.fetch_artifact()).await
    }

    /// Applies one streamed event. Frames for anything but the current task
    /// are discarded.
    pub fn apply_channel_event(&self, event: ChannelEvent) -> Option<TerminalOutcome> {
        match event {
            ChannelEvent::Opened { task_id } => {
                self.say(format!("[+] Attached to logs (task {task_id})"));
                self.update(|state| {
                    if let Some(task) = state.current_task_mut(&task_id) {
                        task.advance(TaskStatus::Running);
                    }
                });
                None
            }
            ChannelEvent::Frame { task_id, frame } => {
                if !self.read(|state| state.is_current(&task_id)) {
                    debug!("stale_frame_dropped: task={task_id}");
                    return None;
                }
                self.say(frame.display_line());
                let inferencer = &self.settings.inferencer;
                let outcome = self.update(|state| {
                    let task = state.current_task_mut(&task_id)?;
                    task.advance(TaskStatus::Running);
                    let outcome = frame.message().and_then(|message| inferencer.infer(message))?;
                    task.advance(outcome.status()).then_some(outcome)
                });
                if let Some(outcome) = outcome {
                    match frame.message().and_then(exit_code) {
                        Some(code) => info!(
                            "task_terminal: task={task_id} status={} exit={code}",
                            outcome.status()
                        ),
                        None => info!("task_terminal: task={task_id} status={}", outcome.status()),
                    }
                }
                outcome
            }
            ChannelEvent::Closed { task_id } => {
                self.say(format!("[*] Log stream closed (task {task_id})"));
                None
            }
            ChannelEvent::Failed { task_id, error } => {
                warn!("channel_failed: task={task_id} error={error}");
                self.say(format!("[!] Log stream error (task {task_id}): {error}"));
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        let previous = self.channel.lock().await.take();
        if let Some(channel) = previous {
            channel.close().await;
        }
    }

    async fn ping(&self) -> Result<bool, ControllerError> {
        self.say("[+] Checking lidar connection...");
        let response: OkResponse = self.submit(PING_PATH, json!({})).await?;
        if response.ok {
            self.say("[+] Lidar reachable");
        } else {
            self.say("[-] Lidar unreachable");
        }
        Ok(response.ok)
    }

    async fn open_session(&self) -> Result<bool, ControllerError> {
        self.say("[+] Connecting to the rig...");
        let response: OkResponse = self.submit(CONNECT_PATH, json!({})).await?;
        if !response.ok {
            self.say("[-] Connection refused");
            return Ok(false);
        }
        self.update(|state| state.session.connected = true);
        info!("session_connected");
        self.say("[+] Connected");
        Ok(true)
    }

    async fn launch_diagnostic(&self, diagnostic: Diagnostic) -> Result<String, ControllerError> {
        self.require_launchable()?;
        let response: TaskResponse = self.submit(diagnostic.path(), json!({})).await?;
        let (task_id, _) = require_task_id(response)?;
        Ok(self.install_task(Task::new(task_id, diagnostic.kind())))
    }

    async fn launch_scan(&self, params: ScanParams) -> Result<String, ControllerError> {
        self.require_launchable()?;
        self.say(format!(
            "[+] Starting scan: range={} step={} duration={} pulse_delay={}",
            params.scan_range, params.scan_step, params.lidar_duration, params.pulse_delay
        ));
        let payload = json!({
            "scan_range": params.scan_range,
            "scan_step": params.scan_step,
            "lidar_duration": params.lidar_duration,
            "pulse_delay": params.pulse_delay,
        });
        let response: TaskResponse = self.submit(START_PATH, payload).await?;
        let (task_id, filename) = require_task_id(response)?;
        if let Some(name) = &filename {
            self.say(format!("[+] Scan will be written to {name}"));
        }
        let task = Task::new(task_id, TaskKind::StartScan).with_promised_filename(filename);
        Ok(self.install_task(task))
    }

    async fn request_stop(&self) -> Result<(), ControllerError> {
        let task_id = self
            .read(ControllerState::active_task_id)
            .ok_or(PreconditionError::NoActiveTask)?;
        self.requests
            .submit(STOP_PATH, json!({ "task_id": task_id }))
            .await?;
        self.update(|state| {
            if let Some(task) = state.current_task_mut(&task_id) {
                task.stop_requested = true;
            }
        });
        info!("stop_requested: task={task_id}");
        self.say("[+] Stop request sent");
        Ok(())
    }

    async fn fetch_artifact(&self) -> Result<PathBuf, ControllerError> {
        let filename = self
            .read(|state| {
                state
                    .task
                    .as_ref()
                    .and_then(Task::produced_filename)
                    .map(str::to_string)
            })
            .ok_or(PreconditionError::NothingToDownload)?;
        let bytes = self
            .requests
            .retrieve(DOWNLOAD_PATH, &[("filename", filename.as_str())])
            .await?;
        let path = self.save_artifact(&filename, &bytes).await?;
        info!("artifact_saved: {}", path.display());
        self.say(format!("[+] Saved {filename} to {}", path.display()));
        Ok(path)
    }

    async fn guarded<T, F>(&self, action: Action, work: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, ControllerError>>,
    {
        let result = match self.begin(action) {
            Ok(slot) => {
                let result = work.await;
                drop(slot);
                result
            }
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!("action_failed: action={} error={err}", action.as_str());
            self.say(format!("[-] {} failed: {err}", action.as_str()));
        }
        result
    }

    fn begin(&self, action: Action) -> Result<InFlight<'_>, ControllerError> {
        self.update(|state| match state.in_flight {
            Some(current) => Err(ControllerError::Busy {
                in_flight: current.as_str(),
            }),
            None => {
                state.in_flight = Some(action);
                Ok(())
            }
        })?;
        Ok(InFlight { controller: self })
    }

    fn require_launchable(&self) -> Result<(), PreconditionError> {
        self.read(|state| {
            if !state.session.connected {
                return Err(PreconditionError::NotConnected);
            }
            match state.active_task_id() {
                Some(task_id) => Err(PreconditionError::TaskActive { task_id }),
                None => Ok(()),
            }
        })
    }

    async fn submit<T: DeserializeOwned>(&self, path: &str, payload: Value) -> Result<T, ControllerError> {
        let value = match self.requests.submit(path, payload).await? {
            Value::Null => json!({}),
            value => value,
        };
        serde_json::from_value(value)
            .map_err(|err| RequestError::new(format!("unexpected response: {err}")).into())
    }

    fn install_task(&self, task: Task) -> String {
        let task_id = task.id.clone();
        info!("task_created: task={task_id} kind={}", task.kind);
        self.say(format!("[+] Task {task_id} ({}) started", task.kind));
        self.update(|state| state.task = Some(task));
        task_id
    }

    /// Replaces the live channel with one for `task_id`. The previous channel
    /// is closed first; a channel whose task was superseded meanwhile is
    /// closed again straight away.
    async fn attach_channel(&self, task_id: &str) {
        let mut slot = self.channel.lock().await;
        if let Some(previous) = slot.take() {
            debug!("channel_replace: {} -> {task_id}", previous.task_id());
            previous.close().await;
        }
        match self.channels.open(task_id, self.events.clone()).await {
            Ok(channel) if self.read(|state| state.is_current(task_id)) => *slot = Some(channel),
            Ok(channel) => {
                debug!("channel_superseded: task={task_id}");
                channel.close().await;
            }
            Err(err) => {
                warn!("channel_open_error: task={task_id} error={err}");
                self.say(format!("[!] Log stream unavailable (task {task_id}): {err}"));
            }
        }
    }

    async fn save_artifact(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, RequestError> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| RequestError::new(format!("invalid artifact name {filename}")))?;
        let dir = &self.settings.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| RequestError::new(format!("cannot create {}: {err}", dir.display())))?;
        let path = dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| RequestError::new(format!("cannot write {}: {err}", path.display())))?;
        Ok(path)
    }

    fn say(&self, line: impl Into<String>) {
        let _ = self.operator_log.send(line.into());
    }

    fn read<R>(&self, view: impl FnOnce(&ControllerState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        view(&state)
    }

    fn update<R>(&self, apply: impl FnOnce(&mut ControllerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let result = apply(&mut state);
        let next = state.affordances();
        drop(state);
        self.affordances.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        result
    }
}

fn require_task_id(response: TaskResponse) -> Result<(String, Option<String>), RequestError> {
    match response.task_id.filter(|id| !id.trim().is_empty()) {
        Some(task_id) => Ok((task_id, response.filename)),
        None => Err(RequestError::new("response missing task_id")),
    }
}
