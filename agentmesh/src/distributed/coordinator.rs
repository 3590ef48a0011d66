//! Distributed execution across service instances.
//!
//! The coordinator selects healthy instances round-robin per service,
//! marks instances unhealthy on failure, fails over exactly once on
//! connection-class errors, and runs multi-task workloads in parallel or
//! sequentially (threading each result into the next task's context).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::io::{AgentInput, AgentOutput};

use super::client::RpcClient;
use super::registry::{ServiceInstance, ServiceRegistry};

/// One remote execution request.
#[derive(Debug, Clone)]
pub struct DistributedTask {
    /// Target service.
    pub service: String,
    /// Agent name on that service.
    pub agent_name: String,
    /// Input for the agent.
    pub input: AgentInput,
}

impl DistributedTask {
    /// Create a task.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        agent_name: impl Into<String>,
        input: AgentInput,
    ) -> Self {
        Self {
            service: service.into(),
            agent_name: agent_name.into(),
            input,
        }
    }
}

/// The outcome of one distributed task.
#[derive(Debug, Clone)]
pub struct DistributedTaskResult {
    /// The task that ran.
    pub task: DistributedTask,
    /// Output on success.
    pub output: Option<AgentOutput>,
    /// Error text on failure.
    pub error: Option<String>,
}

impl DistributedTaskResult {
    /// Whether the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Coordinates remote execution through the registry and RPC client.
#[derive(Debug)]
pub struct Coordinator {
    registry: Arc<ServiceRegistry>,
    client: Arc<RpcClient>,
    counters: Mutex<HashMap<String, usize>>,
}

impl Coordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, client: Arc<RpcClient>) -> Self {
        Self {
            registry,
            client,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the next healthy instance of `service`, round-robin.
    pub fn select_instance(&self, service: &str) -> Result<ServiceInstance> {
        let healthy = self.registry.get_healthy_instances(service);
        if healthy.is_empty() {
            return Err(Error::new(
                ErrorCode::DistributedCoordination,
                "coordinator",
                "select_instance",
                format!("no healthy instances for service '{service}'"),
            ));
        }
        let mut counters = self.counters.lock().expect("counter map poisoned");
        let counter = counters.entry(service.to_string()).or_insert(0);
        let instance = healthy[*counter % healthy.len()].clone();
        *counter += 1;
        Ok(instance)
    }

    /// Execute an agent on `service`, failing over once to a different
    /// healthy instance when the failure is connection-class.
    pub async fn execute_agent(
        &self,
        ctx: &RunContext,
        service: &str,
        agent_name: &str,
        input: &AgentInput,
    ) -> Result<AgentOutput> {
        let instance = self.select_instance(service)?;
        match self
            .client
            .execute_agent(ctx, &instance.endpoint, agent_name, input)
            .await
        {
            Ok(output) => {
                self.registry.mark_healthy(&instance.id);
                Ok(output)
            }
            Err(error) => {
                self.registry.mark_unhealthy(&instance.id);
                if should_retry(&error) {
                    tracing::warn!(
                        instance = %instance.id,
                        error = %error,
                        "instance failed; attempting failover"
                    );
                    self.execute_with_failover(ctx, service, agent_name, input, &instance.id)
                        .await
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Retry exactly once on a different healthy instance.
    async fn execute_with_failover(
        &self,
        ctx: &RunContext,
        service: &str,
        agent_name: &str,
        input: &AgentInput,
        failed_instance: &str,
    ) -> Result<AgentOutput> {
        let healthy = self.registry.get_healthy_instances(service);
        let Some(instance) = healthy.iter().find(|i| i.id != failed_instance) else {
            return Err(Error::new(
                ErrorCode::DistributedCoordination,
                "coordinator",
                "execute_with_failover",
                format!("no alternative healthy instance for service '{service}'"),
            )
            .with_context("failed_instance", failed_instance.to_string()));
        };

        match self
            .client
            .execute_agent(ctx, &instance.endpoint, agent_name, input)
            .await
        {
            Ok(output) => {
                self.registry.mark_healthy(&instance.id);
                Ok(output)
            }
            Err(error) => {
                self.registry.mark_unhealthy(&instance.id);
                Err(error)
            }
        }
    }

    /// Execute with up to `max_retries` additional attempts, backing off
    /// `k · 1s` between attempts and exiting early on cancellation.
    pub async fn execute_with_retry(
        &self,
        ctx: &RunContext,
        service: &str,
        agent_name: &str,
        input: &AgentInput,
        max_retries: u32,
    ) -> Result<AgentOutput> {
        let mut last_error: Option<Error> = None;
        for attempt in 0..=max_retries {
            ctx.ensure_active("coordinator", "execute_with_retry")?;
            if attempt > 0 {
                let delay = Duration::from_secs(u64::from(attempt));
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ctx.cancelled() => {
                        return Err(Error::cancelled("coordinator", "execute_with_retry"));
                    }
                }
            }
            match self.execute_agent(ctx, service, agent_name, input).await {
                Ok(output) => return Ok(output),
                Err(error) => last_error = Some(error),
            }
        }
        let error = last_error.unwrap_or_else(|| {
            Error::internal("coordinator", "execute_with_retry", "no attempts ran")
        });
        Err(error
            .with_context("retry_attempt", max_retries + 1)
            .with_context("max_attempts", max_retries + 1))
    }

    /// Execute every task concurrently. The result vector matches task
    /// input order, and every task's outcome is observable even when
    /// some failed.
    pub async fn execute_parallel(
        &self,
        ctx: &RunContext,
        tasks: Vec<DistributedTask>,
    ) -> Vec<DistributedTaskResult> {
        let jobs = tasks.into_iter().map(|task| async move {
            let outcome = self
                .execute_agent(ctx, &task.service, &task.agent_name, &task.input)
                .await;
            match outcome {
                Ok(output) => DistributedTaskResult {
                    task,
                    output: Some(output),
                    error: None,
                },
                Err(error) => DistributedTaskResult {
                    task,
                    output: None,
                    error: Some(error.to_string()),
                },
            }
        });
        let results = futures::future::join_all(jobs).await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            tracing::warn!(failed, total = results.len(), "parallel execution had failures");
        }
        results
    }

    /// Execute tasks in order, injecting each result into the next
    /// task's `context["previous_output"]`. Stops at the first failure;
    /// the result vector then holds exactly the attempted tasks.
    pub async fn execute_sequential(
        &self,
        ctx: &RunContext,
        tasks: Vec<DistributedTask>,
    ) -> Vec<DistributedTaskResult> {
        let mut results: Vec<DistributedTaskResult> = Vec::new();
        let mut previous: Option<Value> = None;

        for mut task in tasks {
            if ctx.is_cancelled() {
                break;
            }
            if let Some(previous_output) = previous.take() {
                task.input
                    .context
                    .get_or_insert_with(HashMap::new)
                    .insert("previous_output".to_string(), previous_output);
            }

            let outcome = self
                .execute_agent(ctx, &task.service, &task.agent_name, &task.input)
                .await;
            match outcome {
                Ok(output) => {
                    previous = Some(output.result.clone());
                    results.push(DistributedTaskResult {
                        task,
                        output: Some(output),
                        error: None,
                    });
                }
                Err(error) => {
                    results.push(DistributedTaskResult {
                        task,
                        output: None,
                        error: Some(error.to_string()),
                    });
                    break;
                }
            }
        }
        results
    }
}

/// Connection-class failures that justify failover.
fn should_retry(error: &Error) -> bool {
    let mut text = error.to_string().to_lowercase();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push('\n');
        text.push_str(&cause.to_string().to_lowercase());
        source = cause.source();
    }
    ["connection refused", "timeout", "connection reset"]
        .iter()
        .any(|needle| text.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::client::RpcClientConfig;
    use crate::distributed::registry::RegistryConfig;
    use crate::io::OutputStatus;

    fn registry() -> Arc<ServiceRegistry> {
        // A long sweep interval keeps the sweeper out of these tests.
        Arc::new(ServiceRegistry::new(RegistryConfig {
            health_check_interval: Duration::from_secs(3600),
            health_timeout: Duration::from_secs(3600),
        }))
    }

    fn coordinator(registry: &Arc<ServiceRegistry>) -> Coordinator {
        Coordinator::new(
            Arc::clone(registry),
            Arc::new(RpcClient::new(RpcClientConfig::default()).unwrap()),
        )
    }

    fn output_body() -> String {
        serde_json::to_value(AgentOutput::success("done"))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn round_robin_cycles_over_healthy_instances() {
        let registry = registry();
        for id in ["instance-1", "instance-2", "instance-3"] {
            registry
                .register(ServiceInstance::new(
                    id,
                    "test-service",
                    format!("http://{id}.local"),
                ))
                .unwrap();
        }
        let coordinator = coordinator(&registry);

        let picks: Vec<String> = (0..6)
            .map(|_| coordinator.select_instance("test-service").unwrap().id)
            .collect();
        assert_eq!(
            picks,
            vec![
                "instance-1",
                "instance-2",
                "instance-3",
                "instance-1",
                "instance-2",
                "instance-3"
            ]
        );
    }

    #[tokio::test]
    async fn no_healthy_instances_is_a_coordination_error() {
        let registry = registry();
        let coordinator = coordinator(&registry);
        let err = coordinator.select_instance("missing").unwrap_err();
        assert_eq!(err.code, ErrorCode::DistributedCoordination);
    }

    #[tokio::test]
    async fn connection_failure_fails_over_to_the_next_instance() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/agents/worker/execute")
            .with_status(200)
            .with_body(output_body())
            .create_async()
            .await;

        let registry = registry();
        // instance-a sorts first and points at a closed port.
        registry
            .register(ServiceInstance::new(
                "instance-a",
                "svc",
                "http://127.0.0.1:1",
            ))
            .unwrap();
        registry
            .register(ServiceInstance::new("instance-b", "svc", server.url()))
            .unwrap();
        let coordinator = coordinator(&registry);

        let ctx = RunContext::new();
        let output = coordinator
            .execute_agent(&ctx, "svc", "worker", &AgentInput::new("task"))
            .await
            .unwrap();

        assert_eq!(output.status, OutputStatus::Success);
        assert!(!registry.get_instance("instance-a").unwrap().healthy);
        assert!(registry.get_instance("instance-b").unwrap().healthy);
    }

    #[tokio::test]
    async fn non_connection_errors_do_not_fail_over() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/agents/worker/execute")
            .with_status(400)
            .with_body(r#"{"code":"invalid_input","message":"bad task"}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = registry();
        registry
            .register(ServiceInstance::new("only", "svc", server.url()))
            .unwrap();
        let coordinator = coordinator(&registry);

        let ctx = RunContext::new();
        let err = coordinator
            .execute_agent(&ctx, "svc", "worker", &AgentInput::new("task"))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::AgentExecution);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn parallel_results_preserve_task_order() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/agents/worker/execute")
            .with_status(200)
            .with_body(output_body())
            .expect_at_least(3)
            .create_async()
            .await;

        let registry = registry();
        registry
            .register(ServiceInstance::new("i1", "svc", server.url()))
            .unwrap();
        let coordinator = coordinator(&registry);

        let tasks: Vec<DistributedTask> = (0..3)
            .map(|i| DistributedTask::new("svc", "worker", AgentInput::new(format!("task {i}"))))
            .collect();

        let ctx = RunContext::new();
        let results = coordinator.execute_parallel(&ctx, tasks).await;
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.task.input.task, format!("task {i}"));
            assert!(result.is_success());
        }
    }

    #[tokio::test]
    async fn parallel_failures_are_observable_alongside_successes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/agents/worker/execute")
            .with_status(200)
            .with_body(output_body())
            .create_async()
            .await;

        let registry = registry();
        registry
            .register(ServiceInstance::new("good", "svc", server.url()))
            .unwrap();
        let coordinator = coordinator(&registry);

        let tasks = vec![
            DistributedTask::new("svc", "worker", AgentInput::new("ok")),
            DistributedTask::new("ghost-service", "worker", AgentInput::new("doomed")),
        ];

        let ctx = RunContext::new();
        let results = coordinator.execute_parallel(&ctx, tasks).await;
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
    }

    #[tokio::test]
    async fn sequential_injects_previous_output_and_stops_on_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/agents/worker/execute")
            .with_status(200)
            .with_body(output_body())
            .expect_at_least(1)
            .create_async()
            .await;

        let registry = registry();
        registry
            .register(ServiceInstance::new("i1", "svc", server.url()))
            .unwrap();
        let coordinator = coordinator(&registry);

        let tasks = vec![
            DistributedTask::new("svc", "worker", AgentInput::new("first")),
            DistributedTask::new("svc", "worker", AgentInput::new("second")),
            DistributedTask::new("ghost", "worker", AgentInput::new("fails")),
            DistributedTask::new("svc", "worker", AgentInput::new("never runs")),
        ];

        let ctx = RunContext::new();
        let results = coordinator.execute_sequential(&ctx, tasks).await;

        // Exactly 1 + failed_index entries.
        assert_eq!(results.len(), 3);
        assert!(results[2].error.is_some());

        // The second task saw the first task's result.
        let second_ctx = results[1].task.input.context.as_ref().unwrap();
        assert_eq!(second_ctx["previous_output"], "done");
        // The first task had no previous output injected.
        assert!(results[0].task.input.context.is_none());
    }

    #[tokio::test]
    async fn retry_with_backoff_exits_on_cancellation() {
        let registry = registry();
        registry
            .register(ServiceInstance::new("dead", "svc", "http://127.0.0.1:1"))
            .unwrap();
        let coordinator = coordinator(&registry);

        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = coordinator
            .execute_with_retry(&ctx, "svc", "worker", &AgentInput::new("t"), 5)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ContextTimeout);
    }
}
