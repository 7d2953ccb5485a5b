//! HTTP client for the coordinator API

use crate::error::AgentError;
use phalanx_core::protocol::{
    AgentRequest, ClaimRequest, ClaimResponse, CleanupResponse, CompleteRequest, CompleteResponse,
    ErrorBody, RegisterRequest, RegisterResponse, StatusResponse,
};
use phalanx_core::task::Task;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// JSON-over-HTTP client for the coordinator service.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    /// Create a client for a coordinator base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AgentError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            Err(AgentError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AgentError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AgentError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Register this runtime; returns the assigned id and config snapshot.
    pub async fn register(
        &self,
        capabilities: Vec<String>,
        preferred_id: Option<String>,
    ) -> Result<RegisterResponse, AgentError> {
        self.post(
            "/agent/register",
            &RegisterRequest {
                capabilities,
                preferred_id,
            },
        )
        .await
    }

    /// Send a heartbeat.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<(), AgentError> {
        let _: serde_json::Value = self
            .post(
                "/agent/heartbeat",
                &AgentRequest {
                    agent_id: agent_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Unregister on shutdown.
    pub async fn unregister(&self, agent_id: &str) -> Result<(), AgentError> {
        let _: serde_json::Value = self
            .post(
                "/agent/unregister",
                &AgentRequest {
                    agent_id: agent_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Claim the next available task.
    pub async fn claim(&self, agent_id: &str) -> Result<ClaimResponse, AgentError> {
        self.post(
            "/task/claim",
            &ClaimRequest {
                agent_id: agent_id.to_string(),
            },
        )
        .await
    }

    /// Signal task completion.
    pub async fn complete(
        &self,
        agent_id: &str,
        task_id: &str,
        success: bool,
        branch_name: Option<String>,
        pr_handle: Option<String>,
    ) -> Result<CompleteResponse, AgentError> {
        self.post(
            "/task/complete",
            &CompleteRequest {
                agent_id: agent_id.to_string(),
                task_id: task_id.to_string(),
                success,
                branch_name,
                pr_handle,
            },
        )
        .await
    }

    /// Fetch one task (used by the fix loop).
    pub async fn get_task(&self, task_id: &str) -> Result<Task, AgentError> {
        self.get(&format!("/task/{task_id}")).await
    }

    /// Fetch orchestrator status.
    pub async fn status(&self) -> Result<StatusResponse, AgentError> {
        self.get("/status").await
    }

    /// Trigger a manual cleanup sweep.
    pub async fn cleanup(&self) -> Result<CleanupResponse, AgentError> {
        self.post("/cleanup", &serde_json::json!({})).await
    }
}
