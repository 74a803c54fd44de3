//! HTTP client for the master's worker channel.
//!
//! Every endpoint answers HTTP 200 with an envelope; a FAIL code is
//! surfaced as an error here so callers only deal with `SchedulerResult`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use taskmaster_core::models::{
    HeartbeatRequest, LoginRequest, PullResponse, RegisterRequest, TaskCallbackRequest,
};
use taskmaster_core::{SchedulerError, SchedulerResult};

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    content: serde_json::Value,
}

/// Destination for task results. The master client is the production
/// implementation; tests substitute a recorder.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn report(&self, req: &TaskCallbackRequest) -> SchedulerResult<()>;
}

pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_rpc<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SchedulerResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: Envelope = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(format!("{url}: {e}")))?
            .json()
            .await
            .map_err(|e| SchedulerError::Network(format!("{url}: 响应解析失败: {e}")))?;
        if envelope.code != "SUCCESS" {
            let msg = envelope
                .content
                .as_str()
                .unwrap_or("unknown failure")
                .to_string();
            return Err(SchedulerError::Internal(format!("master拒绝请求: {msg}")));
        }
        serde_json::from_value(envelope.content).map_err(SchedulerError::from)
    }

    /// Authenticate and join the fleet; returns the assigned worker id.
    pub async fn login(
        &self,
        name: &str,
        password: &str,
        worker_id: &str,
    ) -> SchedulerResult<String> {
        #[derive(Deserialize)]
        struct LoginResponse {
            worker_id: String,
        }
        let req = LoginRequest {
            name: name.to_string(),
            password: password.to_string(),
            worker_id: worker_id.to_string(),
        };
        let resp: LoginResponse = self
            .post_rpc("/api/worker/login", &req)
            .await
            .map_err(|e| match e {
                SchedulerError::Internal(msg) => SchedulerError::Authentication(msg),
                other => other,
            })?;
        debug!("login accepted, worker_id={}", resp.worker_id);
        Ok(resp.worker_id)
    }

    /// Enroll a new credential with the master. A duplicate name is
    /// rejected with an authentication error.
    pub async fn register(
        &self,
        name: &str,
        password: &str,
        params: serde_json::Value,
    ) -> SchedulerResult<()> {
        let req = RegisterRequest {
            name: name.to_string(),
            password: password.to_string(),
            params,
        };
        let _: serde_json::Value = self
            .post_rpc("/api/worker/register", &req)
            .await
            .map_err(|e| match e {
                SchedulerError::Internal(msg) => SchedulerError::Authentication(msg),
                other => other,
            })?;
        Ok(())
    }

    /// Returns false when the master does not know this worker; the
    /// caller should log in again.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> SchedulerResult<bool> {
        #[derive(Deserialize)]
        struct HeartbeatResponse {
            known: bool,
        }
        let resp: HeartbeatResponse = self.post_rpc("/api/worker/heartbeat", req).await?;
        Ok(resp.known)
    }

    pub async fn pull(&self, worker_id: &str) -> SchedulerResult<PullResponse> {
        let body = serde_json::json!({ "worker_id": worker_id });
        self.post_rpc("/api/worker/pull", &body).await
    }

    pub async fn logout(&self, worker_id: &str) -> SchedulerResult<()> {
        let body = serde_json::json!({ "worker_id": worker_id });
        let _: serde_json::Value = self.post_rpc("/api/worker/logout", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for MasterClient {
    async fn report(&self, req: &TaskCallbackRequest) -> SchedulerResult<()> {
        let _: serde_json::Value = self.post_rpc("/api/worker/task_callback", req).await?;
        Ok(())
    }
}
