use async_trait::async_trait;
use reqwest::Client;
use scanctl_core::RequestError;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Request/response access to the backend.
#[async_trait]
pub trait RequestIssuer: Send + Sync {
    /// POSTs `payload` as JSON and returns the decoded JSON response.
    async fn submit(&self, path: &str, payload: Value) -> Result<Value, RequestError>;

    /// GETs `path` with the given query and returns the raw body.
    async fn retrieve(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, RequestError>;
}

#[derive(Clone)]
pub struct RequestClient {
    base_url: Url,
    client: Client,
}

impl RequestClient {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RequestError::new(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            base_url: base_url.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let suffix = path.trim_start_matches('/');
        format!("{base}/{suffix}")
    }

    async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, RequestError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| RequestError::new(format!("response read failed: {err}")))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            if text.is_empty() {
                return Err(RequestError::new(status.as_u16().to_string()));
            }
            return Err(RequestError::new(text));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RequestIssuer for RequestClient {
    async fn submit(&self, path: &str, payload: Value) -> Result<Value, RequestError> {
        let url = self.endpoint(path);
        debug!("request_submit: {url}");
        let payload = if payload.is_null() {
            Value::Object(Default::default())
        } else {
            payload
        };
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| RequestError::new(err.to_string()))?;
        let body = Self::read_body(response).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|err| RequestError::new(format!("malformed response: {err}")))
    }

    async fn retrieve(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, RequestError> {
        let url = self.endpoint(path);
        debug!("request_retrieve: {url}");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| RequestError::new(err.to_string()))?;
        Self::read_body(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let base = Url::parse("http://rig.local:8000/").expect("url");
        let client = RequestClient::new(&base, Duration::from_secs(1)).expect("client");
        assert_eq!(
            client.endpoint("/api/lidar/ping"),
            "http://rig.local:8000/api/lidar/ping"
        );

        let prefixed = Url::parse("http://rig.local/console").expect("url");
        let client = RequestClient::new(&prefixed, Duration::from_secs(1)).expect("client");
        assert_eq!(
            client.endpoint("api/lidar/stop"),
            "http://rig.local/console/api/lidar/stop"
        );
    }
}
