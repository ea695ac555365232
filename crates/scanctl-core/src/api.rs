//! Backend endpoint paths and response bodies.

use serde::{Deserialize, Serialize};

pub const PING_PATH: &str = "/api/lidar/ping";
pub const CONNECT_PATH: &str = "/api/lidar/connect";
pub const LIDAR_TEST_PATH: &str = "/api/lidar/test";
pub const ENGINE_TEST_PATH: &str = "/api/lidar/engine_test";
pub const START_PATH: &str = "/api/lidar/start";
pub const STOP_PATH: &str = "/api/lidar/stop";
pub const DOWNLOAD_PATH: &str = "/api/lidar/download";
/// Path segments of the per-task log stream; the task id is appended as one
/// more segment.
pub const LOG_STREAM_SEGMENTS: [&str; 3] = ["api", "lidar", "ws"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OkResponse {
    #[serde(default)]
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopRequest {
    pub task_id: String,
}
