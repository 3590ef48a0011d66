//! HTTP RPC client for remote agent execution.
//!
//! The wire shapes are fixed (JSON bodies, `/api/v1/agents/...` paths)
//! but otherwise opaque. Every response body is consumed on every path so
//! connections return to the pool.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::io::{AgentInput, AgentOutput};

/// Configuration for an [`RpcClient`].
#[derive(Debug, Clone, Copy)]
pub struct RpcClientConfig {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// How long idle connections are kept.
    pub pool_idle_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Result of polling an asynchronous execution.
#[derive(Debug, Clone)]
pub enum AsyncPoll {
    /// The execution finished.
    Ready(AgentOutput),
    /// Still running; poll again.
    Pending,
}

#[derive(Debug, Deserialize)]
struct AsyncSubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ListAgentsResponse {
    agents: Vec<String>,
}

/// Error body returned by remote instances on non-2xx responses.
#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP+JSON client for remote agent instances.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    /// Create a client with a bounded connection pool.
    pub fn new(config: RpcClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorCode::DistributedConnection,
                    "rpc_client",
                    "new",
                    "failed to build HTTP client",
                )
                .with_source(e)
            })?;
        Ok(Self { http })
    }

    /// Create a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(RpcClientConfig::default())
    }

    /// Execute an agent synchronously:
    /// `POST {endpoint}/api/v1/agents/{name}/execute`.
    pub async fn execute_agent(
        &self,
        ctx: &RunContext,
        endpoint: &str,
        agent_name: &str,
        input: &AgentInput,
    ) -> Result<AgentOutput> {
        ctx.ensure_active("rpc_client", "execute_agent")?;
        let url = format!("{}/api/v1/agents/{agent_name}/execute", trim_slash(endpoint));

        let response = self
            .http
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| connection_error("execute_agent", &url, e))?;

        if response.status().is_success() {
            response
                .json::<AgentOutput>()
                .await
                .map_err(|e| serialization_error("execute_agent", &url, e))
        } else {
            Err(remote_error("execute_agent", &url, response).await)
        }
    }

    /// Submit an asynchronous execution:
    /// `POST {endpoint}/api/v1/agents/{name}/execute/async`, 202 →
    /// the task id to poll.
    pub async fn execute_agent_async(
        &self,
        ctx: &RunContext,
        endpoint: &str,
        agent_name: &str,
        input: &AgentInput,
    ) -> Result<String> {
        ctx.ensure_active("rpc_client", "execute_agent_async")?;
        let url = format!(
            "{}/api/v1/agents/{agent_name}/execute/async",
            trim_slash(endpoint)
        );

        let response = self
            .http
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| connection_error("execute_agent_async", &url, e))?;

        if response.status() == reqwest::StatusCode::ACCEPTED {
            let submitted = response
                .json::<AsyncSubmitResponse>()
                .await
                .map_err(|e| serialization_error("execute_agent_async", &url, e))?;
            Ok(submitted.task_id)
        } else {
            Err(remote_error("execute_agent_async", &url, response).await)
        }
    }

    /// Poll an asynchronous execution:
    /// `GET {endpoint}/api/v1/agents/tasks/{task_id}`; 200 is terminal,
    /// 202 means still pending.
    pub async fn get_async_result(
        &self,
        ctx: &RunContext,
        endpoint: &str,
        task_id: &str,
    ) -> Result<AsyncPoll> {
        ctx.ensure_active("rpc_client", "get_async_result")?;
        let url = format!("{}/api/v1/agents/tasks/{task_id}", trim_slash(endpoint));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_error("get_async_result", &url, e))?;

        match response.status() {
            status if status == reqwest::StatusCode::ACCEPTED => {
                // Drain the (empty) body so the connection is reusable.
                let _ = response.bytes().await;
                Ok(AsyncPoll::Pending)
            }
            status if status.is_success() => {
                let output = response
                    .json::<AgentOutput>()
                    .await
                    .map_err(|e| serialization_error("get_async_result", &url, e))?;
                Ok(AsyncPoll::Ready(output))
            }
            _ => Err(remote_error("get_async_result", &url, response).await),
        }
    }

    /// Poll until the execution finishes or the context is cancelled.
    pub async fn wait_for_async_result(
        &self,
        ctx: &RunContext,
        endpoint: &str,
        task_id: &str,
        poll_interval: Duration,
    ) -> Result<AgentOutput> {
        loop {
            match self.get_async_result(ctx, endpoint, task_id).await? {
                AsyncPoll::Ready(output) => return Ok(output),
                AsyncPoll::Pending => {
                    tokio::select! {
                        () = tokio::time::sleep(poll_interval) => {}
                        () = ctx.cancelled() => {
                            return Err(Error::cancelled("rpc_client", "wait_for_async_result"));
                        }
                    }
                }
            }
        }
    }

    /// Probe `GET {endpoint}/health`. Any 2xx counts as healthy.
    pub async fn health_check(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", trim_slash(endpoint));
        match self.http.get(&url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                let _ = response.bytes().await;
                healthy
            }
            Err(_) => false,
        }
    }

    /// List agents advertised by an instance:
    /// `GET {endpoint}/api/v1/agents`.
    pub async fn list_agents(&self, ctx: &RunContext, endpoint: &str) -> Result<Vec<String>> {
        ctx.ensure_active("rpc_client", "list_agents")?;
        let url = format!("{}/api/v1/agents", trim_slash(endpoint));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_error("list_agents", &url, e))?;

        if response.status().is_success() {
            let listed = response
                .json::<ListAgentsResponse>()
                .await
                .map_err(|e| serialization_error("list_agents", &url, e))?;
            Ok(listed.agents)
        } else {
            Err(remote_error("list_agents", &url, response).await)
        }
    }
}

fn trim_slash(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}

fn connection_error(operation: &str, url: &str, cause: reqwest::Error) -> Error {
    Error::new(
        ErrorCode::DistributedConnection,
        "rpc_client",
        operation,
        format!("request to {url} failed: {cause}"),
    )
    .with_context("url", url.to_string())
    .with_source(cause)
}

fn serialization_error(operation: &str, url: &str, cause: reqwest::Error) -> Error {
    Error::new(
        ErrorCode::DistributedSerialization,
        "rpc_client",
        operation,
        format!("invalid response body from {url}"),
    )
    .with_context("url", url.to_string())
    .with_source(cause)
}

/// Map a non-2xx response to an execution error, consuming the body.
async fn remote_error(operation: &str, url: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
    let message = match parsed {
        Some(body) if !body.message.is_empty() => {
            format!("remote returned {status}: [{}] {}", body.code, body.message)
        }
        _ => format!("remote returned {status}"),
    };
    Error::new(ErrorCode::AgentExecution, "rpc_client", operation, message)
        .with_context("url", url.to_string())
        .with_context("status", u16::from(status))
}
