//! The supervisor orchestrator.
//!
//! A [`Supervisor`] decomposes a request into typed [`Task`]s via the
//! LLM, stages them by priority, routes each task to a registered
//! sub-agent through a pluggable [`Router`], executes stages with bounded
//! parallelism plus retry and timeout, and aggregates the results.

mod aggregate;
mod router;
mod task;

pub use aggregate::{AggregationStrategy, aggregate};
pub use router::{
    CapabilityRouter, HybridRouter, LlmRouter, LoadBalancedRouter, RandomRouter,
    RoundRobinRouter, Router, RoutingRule, RuleRouter, SharedRouter,
};
pub use task::{Task, TaskResult, group_into_stages};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::agent::{Agent, AgentInfo, SharedAgent};
use crate::callback::CallbackSet;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::io::{AgentInput, AgentOutput};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::retry::{RetryPolicy, retry_async};
use crate::runnable::Runnable;

/// Configuration for a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Tasks in flight per stage. At least 1.
    pub max_concurrent_agents: usize,
    /// Upper bound for one sub-agent attempt.
    pub sub_agent_timeout: Duration,
    /// Retry policy for sub-agent execution.
    pub retry: RetryPolicy,
    /// How task results are combined.
    pub aggregation: AggregationStrategy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            sub_agent_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            aggregation: AggregationStrategy::Merge,
        }
    }
}

impl SupervisorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_concurrent_agents == 0 {
            return Err(Error::invalid_config(
                "supervisor",
                "new",
                "max_concurrent_agents must be at least 1",
            ));
        }
        if self.sub_agent_timeout.is_zero() {
            return Err(Error::invalid_config(
                "supervisor",
                "new",
                "sub_agent_timeout must be positive",
            ));
        }
        Ok(())
    }
}

/// Atomic run counters.
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    total_tasks: AtomicU64,
    successful_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    total_time_ms: AtomicU64,
}

impl SupervisorMetrics {
    fn record(&self, successful: u64, failed: u64, elapsed: Duration) {
        self.total_tasks.fetch_add(successful + failed, Ordering::Relaxed);
        self.successful_tasks.fetch_add(successful, Ordering::Relaxed);
        self.failed_tasks.fetch_add(failed, Ordering::Relaxed);
        self.total_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_tasks.load(Ordering::Relaxed);
        let successful = self.successful_tasks.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_tasks: total,
            successful_tasks: successful,
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            total_time: Duration::from_millis(self.total_time_ms.load(Ordering::Relaxed)),
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
        }
    }
}

/// A point-in-time view of [`SupervisorMetrics`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks executed across all runs.
    pub total_tasks: u64,
    /// Tasks that succeeded.
    pub successful_tasks: u64,
    /// Tasks that failed.
    pub failed_tasks: u64,
    /// Accumulated wall-clock run time.
    pub total_time: Duration,
    /// `successful / total`, or zero before any task ran.
    pub success_rate: f64,
}

/// Decomposes requests and orchestrates sub-agents.
pub struct Supervisor {
    name: String,
    description: String,
    llm: Arc<dyn LlmClient>,
    agents: RwLock<HashMap<String, SharedAgent>>,
    router: SharedRouter,
    config: SupervisorConfig,
    metrics: SupervisorMetrics,
    callbacks: CallbackSet,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name)
            .field("agents", &self.agent_infos().len())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor with default configuration.
    pub fn new(
        name: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        router: SharedRouter,
    ) -> Self {
        Self {
            name: name.into(),
            description: "Decomposes requests and delegates subtasks to registered sub-agents"
                .to_string(),
            llm,
            agents: RwLock::new(HashMap::new()),
            router,
            config: SupervisorConfig::default(),
            metrics: SupervisorMetrics::default(),
            callbacks: CallbackSet::new(),
        }
    }

    /// Replace the configuration. Validates bounds.
    pub fn with_config(mut self, config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Attach lifecycle callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackSet) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Register a sub-agent, replacing any agent of the same name.
    pub fn register_agent(&self, agent: SharedAgent) {
        self.agents
            .write()
            .expect("agent map poisoned")
            .insert(agent.name().to_string(), agent);
    }

    /// Remove a sub-agent.
    pub fn deregister_agent(&self, name: &str) {
        self.agents.write().expect("agent map poisoned").remove(name);
    }

    /// Catalog of registered sub-agents, sorted by name.
    #[must_use]
    pub fn agent_infos(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().expect("agent map poisoned");
        let mut infos: Vec<AgentInfo> = agents
            .values()
            .map(|agent| AgentInfo::from_agent(agent.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Run metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Decompose, stage, execute, and aggregate a request.
    pub async fn run(&self, ctx: &RunContext, request: &str) -> Result<AgentOutput> {
        let started = Instant::now();
        let input = AgentInput::new(request);
        self.callbacks.start(&self.name, &input).await;

        let tasks = self.decompose(ctx, request).await?;
        let results = self.execute_tasks(ctx, tasks).await?;

        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - successful;
        let elapsed = started.elapsed();
        self.metrics.record(successful as u64, failed as u64, elapsed);

        let value = aggregate(self.config.aggregation, &results);
        let errors: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.task_id)))
            .collect();

        let mut output = if failed == 0 {
            AgentOutput::success(value)
        } else if successful == 0 {
            AgentOutput::failed("every subtask failed")
                .with_metadata("errors", errors.clone())
        } else {
            AgentOutput::partial(value, errors)
        };
        output = output
            .with_metadata("total_tasks", results.len())
            .with_metadata("successful_tasks", successful)
            .with_metadata("failed_tasks", failed)
            .with_metadata(
                "success_rate",
                if results.is_empty() {
                    0.0
                } else {
                    successful as f64 / results.len() as f64
                },
            )
            .with_latency(elapsed);

        self.callbacks.end(&self.name, &output).await;
        Ok(output)
    }

    /// Ask the LLM to break a request into tasks, one per line.
    ///
    /// Blank lines are dropped; ids and priorities are assigned
    /// monotonically in parse order.
    pub async fn decompose(&self, ctx: &RunContext, request: &str) -> Result<Vec<Task>> {
        let catalog: String = self
            .agent_infos()
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You coordinate the following agents:\n{catalog}\n\n\
             Break the request below into independent subtasks, one per \
             line, ordered by execution priority. Reply with only the \
             subtask lines.\n\nRequest: {request}"
        );

        let messages = [Message::user(prompt)];
        self.callbacks.llm_start(&self.name, &messages).await;
        let response = self.llm.chat(ctx, &messages).await?;
        self.callbacks.llm_end(&self.name, &response).await;

        let tasks: Vec<Task> = response
            .content
            .lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .trim_start_matches(['.', ')'])
                    .trim()
            })
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(index, description)| {
                Task::new(format!("task_{}", index + 1), description)
                    .with_priority(index as u32 + 1)
            })
            .collect();

        if tasks.is_empty() {
            return Err(Error::new(
                ErrorCode::AgentExecution,
                "supervisor",
                "decompose",
                "decomposition produced no tasks",
            ));
        }
        Ok(tasks)
    }

    /// Execute tasks stage by stage.
    ///
    /// Stages are sequential join points; tasks within a stage run in
    /// parallel bounded by `max_concurrent_agents`. The returned results
    /// preserve task order.
    pub async fn execute_tasks(
        &self,
        ctx: &RunContext,
        tasks: Vec<Task>,
    ) -> Result<Vec<TaskResult>> {
        let stages = group_into_stages(tasks);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_agents));
        let mut results = Vec::new();

        for stage in stages {
            ctx.ensure_active("supervisor", "execute_tasks")?;
            let jobs = stage.into_iter().map(|task| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    self.execute_task(ctx, task).await
                }
            });
            results.extend(futures::future::join_all(jobs).await);
        }
        Ok(results)
    }

    /// Route and execute one task. Failures are encoded in the result,
    /// never propagated, so one task cannot sink its stage.
    async fn execute_task(&self, ctx: &RunContext, task: Task) -> TaskResult {
        let started = Instant::now();
        let infos = self.agent_infos();

        let agent_name = match self.router.route(ctx, &task, &infos).await {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(task = %task.id, error = %error, "routing failed");
                return TaskResult {
                    task_id: task.id,
                    agent_name: String::new(),
                    output: Value::Null,
                    error: Some(error.to_string()),
                    duration: started.elapsed(),
                    confidence: 0.0,
                };
            }
        };

        let agent = self
            .agents
            .read()
            .expect("agent map poisoned")
            .get(&agent_name)
            .cloned();
        let Some(agent) = agent else {
            self.router.release_task(&agent_name);
            return TaskResult {
                task_id: task.id,
                agent_name: agent_name.clone(),
                output: Value::Null,
                error: Some(format!("agent '{agent_name}' is no longer registered")),
                duration: started.elapsed(),
                confidence: 0.0,
            };
        };

        self.callbacks
            .agent_action(
                &self.name,
                "route",
                &serde_json::json!({ "task": task.id, "agent": agent_name }),
            )
            .await;

        let input = AgentInput::new(task.description.clone())
            .with_context_value("task_id", task.id.clone())
            .with_context_value("task_type", task.task_type.clone());
        let timeout = self.config.sub_agent_timeout;
        let agent_ref = &agent;
        let outcome = retry_async(
            ctx,
            &self.config.retry,
            "supervisor",
            "execute_task",
            move |_| {
                let input = input.clone();
                async move {
                    let scoped = ctx.with_timeout(timeout);
                    match tokio::time::timeout(timeout, agent_ref.execute(&scoped, input)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::new(
                            ErrorCode::ContextTimeout,
                            "supervisor",
                            "execute_task",
                            format!("sub-agent timed out after {timeout:?}"),
                        )),
                    }
                }
            },
        )
        .await;

        self.router.release_task(&agent_name);

        match outcome {
            Ok(output) => {
                self.router.update_routing(&agent_name, 1.0);
                let confidence = output
                    .metadata
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0);
                TaskResult {
                    task_id: task.id,
                    agent_name,
                    output: output.result,
                    error: None,
                    duration: started.elapsed(),
                    confidence,
                }
            }
            Err(error) => {
                self.router.update_routing(&agent_name, 0.0);
                self.callbacks.error("supervisor", &error).await;
                TaskResult {
                    task_id: task.id,
                    agent_name,
                    output: Value::Null,
                    error: Some(error.to_string()),
                    duration: started.elapsed(),
                    confidence: 0.0,
                }
            }
        }
    }
}

#[async_trait]
impl Agent for Supervisor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["orchestration".to_string(), "delegation".to_string()]
    }

    async fn execute(&self, ctx: &RunContext, input: AgentInput) -> Result<AgentOutput> {
        self.run(ctx, &input.task).await
    }
}

#[async_trait]
impl Runnable for Supervisor {
    type Input = AgentInput;
    type Output = AgentOutput;

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &RunContext, input: AgentInput) -> Result<AgentOutput> {
        self.run(ctx, &input.task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FnAgent;
    use crate::io::OutputStatus;
    use crate::llm::ScriptedLlm;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    fn echo_agent(name: &'static str) -> SharedAgent {
        Arc::new(FnAgent::new(name, "echoes tasks", move |input: AgentInput| async move {
            Ok(AgentOutput::success(format!("{name}:{}", input.task)))
        }))
    }

    fn supervisor_with(llm: Arc<ScriptedLlm>, router: SharedRouter) -> Supervisor {
        let supervisor = Supervisor::new("supervisor", llm, router);
        supervisor.register_agent(echo_agent("alpha"));
        supervisor.register_agent(echo_agent("beta"));
        supervisor
    }

    #[tokio::test]
    async fn decomposition_yields_one_task_per_line() {
        let llm = Arc::new(ScriptedLlm::new(vec!["task1\ntask2\ntask3"]));
        let supervisor = supervisor_with(llm, Arc::new(RoundRobinRouter::new()));

        let ctx = RunContext::new();
        let tasks = supervisor.decompose(&ctx, "do the work").await.unwrap();

        assert_eq!(tasks.len(), 3);
        let mut ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        for task in &tasks {
            assert_eq!(task.task_type, "general");
            assert!(task.priority > 0);
            assert!(!task.description.is_empty());
        }
    }

    #[tokio::test]
    async fn decomposition_strips_numbering_and_blanks() {
        let llm = Arc::new(ScriptedLlm::new(vec!["1. first\n\n2) second\n"]));
        let supervisor = supervisor_with(llm, Arc::new(RoundRobinRouter::new()));

        let ctx = RunContext::new();
        let tasks = supervisor.decompose(&ctx, "request").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].description, "first");
        assert_eq!(tasks[1].description, "second");
    }

    #[tokio::test]
    async fn run_routes_executes_and_merges() {
        let llm = Arc::new(ScriptedLlm::new(vec!["task one\ntask two"]));
        let supervisor = supervisor_with(llm, Arc::new(RoundRobinRouter::new()));

        let ctx = RunContext::new();
        let output = supervisor.run(&ctx, "do both").await.unwrap();

        assert_eq!(output.status, OutputStatus::Success);
        let results = output.result["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(output.metadata["total_tasks"], 2);
        assert_eq!(output.metadata["success_rate"], 1.0);

        let metrics = supervisor.metrics();
        assert_eq!(metrics.total_tasks, 2);
        assert_eq!(metrics.successful_tasks, 2);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failed_tasks_produce_a_partial_output() {
        let llm = Arc::new(ScriptedLlm::new(vec!["good task\nbad task"]));
        let supervisor = Supervisor::new("supervisor", llm, Arc::new(RoundRobinRouter::new()));
        supervisor.register_agent(echo_agent("alpha"));
        supervisor.register_agent(Arc::new(FnAgent::new(
            "broken",
            "always fails",
            |_input: AgentInput| async move {
                Err(Error::new(
                    ErrorCode::AgentExecution,
                    "broken",
                    "execute",
                    "unrecoverable",
                ))
            },
        )));

        let ctx = RunContext::new();
        let output = supervisor.run(&ctx, "mixed").await.unwrap();

        assert_eq!(output.status, OutputStatus::Partial);
        assert_eq!(output.metadata["failed_tasks"], 1);
        assert_eq!(output.metadata["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retryable_sub_agent_failures_are_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec!["one task"]));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let supervisor = Supervisor::new("supervisor", llm, Arc::new(RoundRobinRouter::new()))
            .with_config(SupervisorConfig {
                retry: RetryPolicy {
                    max_retries: 2,
                    initial_delay: Duration::from_millis(1),
                    ..RetryPolicy::default()
                },
                ..SupervisorConfig::default()
            })
            .unwrap();
        supervisor.register_agent(Arc::new(FnAgent::new(
            "flaky",
            "fails once",
            move |_input: AgentInput| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::new(
                            ErrorCode::AgentExecution,
                            "flaky",
                            "execute",
                            "temporary outage",
                        ))
                    } else {
                        Ok(AgentOutput::success("recovered"))
                    }
                }
            },
        )));

        let ctx = RunContext::new();
        let output = supervisor.run(&ctx, "request").await.unwrap();

        assert_eq!(output.status, OutputStatus::Success);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_balanced_capacity_is_released_after_each_task() {
        let llm = Arc::new(ScriptedLlm::new(vec!["a\nb\nc"]));
        let supervisor = Supervisor::new(
            "supervisor",
            llm,
            Arc::new(LoadBalancedRouter::new(1)),
        );
        supervisor.register_agent(echo_agent("solo"));

        let ctx = RunContext::new();
        // Three single-task stages against one agent with capacity 1:
        // only release-on-completion makes this succeed.
        let output = supervisor.run(&ctx, "request").await.unwrap();
        assert_eq!(output.status, OutputStatus::Success);
    }

    #[tokio::test]
    async fn stages_run_in_priority_order() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&order);

        let llm = Arc::new(ScriptedLlm::new(vec!["unused"]));
        let supervisor = Supervisor::new("supervisor", llm, Arc::new(RoundRobinRouter::new()));
        supervisor.register_agent(Arc::new(FnAgent::new(
            "recorder",
            "records execution order",
            move |input: AgentInput| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(input.task.clone());
                    Ok(AgentOutput::success(input.task))
                }
            },
        )));

        let tasks = vec![
            Task::new("late", "late work").with_priority(2),
            Task::new("early", "early work").with_priority(1),
        ];
        let ctx = RunContext::new();
        let results = supervisor.execute_tasks(&ctx, tasks).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["early work", "late work"]);
        // Results preserve stage order.
        assert_eq!(results[0].task_id, "early");
        assert_eq!(results[1].task_id, "late");
    }

    #[tokio::test]
    async fn routing_failure_is_recorded_not_propagated() {
        let llm = Arc::new(ScriptedLlm::new(vec!["task"]));
        // A rule router with no rules never matches.
        let supervisor = Supervisor::new("supervisor", llm, Arc::new(RuleRouter::new()));
        supervisor.register_agent(echo_agent("alpha"));

        let ctx = RunContext::new();
        let output = supervisor.run(&ctx, "request").await.unwrap();
        assert_eq!(output.status, OutputStatus::Failed);
    }
}
