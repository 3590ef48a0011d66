//! Skeleton-of-Thought planning and elaboration.
//!
//! [`SotAgent`] asks the LLM for a skeleton of 3–N points with explicit
//! dependencies, groups the points into dependency levels, elaborates each
//! level in parallel (feeding completed dependency elaborations into each
//! prompt), and aggregates the results sequentially or hierarchically.

mod parser;
mod plan;

pub use parser::{default_skeleton, parse_skeleton};
pub use plan::{PointStatus, SkeletonPoint, group_by_dependency_level};

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::agent::Agent;
use crate::callback::CallbackSet;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::io::{AgentInput, AgentOutput, ReasoningStep};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::runnable::Runnable;

/// How elaborated points are combined into the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMode {
    /// Concatenate `Title\nElaboration` in original order.
    #[default]
    Sequential,
    /// Emit a hierarchical document walking points and their sub-points.
    Hierarchical,
}

/// Configuration for a [`SotAgent`].
#[derive(Debug, Clone)]
pub struct SotConfig {
    /// Fewest acceptable skeleton points; fewer synthesizes the default
    /// skeleton. At least 1.
    pub min_points: usize,
    /// Most skeleton points to keep. At least `min_points`.
    pub max_points: usize,
    /// Ask the LLM to decompose the task; when off, the default skeleton
    /// is used directly.
    pub auto_decompose: bool,
    /// Parallel elaborations in flight per level. At least 1.
    pub max_concurrency: usize,
    /// Upper bound for one elaboration call.
    pub elaboration_timeout: Duration,
    /// Points submitted per scheduling chunk within a level. At least 1.
    pub batch_size: usize,
    /// Aggregation strategy.
    pub aggregation: AggregationMode,
    /// Respect dependency ordering; when off, every point elaborates in
    /// one parallel level.
    pub dependency_aware: bool,
}

impl Default for SotConfig {
    fn default() -> Self {
        Self {
            min_points: 3,
            max_points: 10,
            auto_decompose: true,
            max_concurrency: 4,
            elaboration_timeout: Duration::from_secs(60),
            batch_size: 4,
            aggregation: AggregationMode::Sequential,
            dependency_aware: true,
        }
    }
}

impl SotConfig {
    fn validate(&self) -> Result<()> {
        if self.min_points == 0 || self.max_points < self.min_points {
            return Err(Error::invalid_config(
                "sot_agent",
                "new",
                "point bounds must satisfy max_points >= min_points >= 1",
            ));
        }
        if self.max_concurrency == 0 || self.batch_size == 0 {
            return Err(Error::invalid_config(
                "sot_agent",
                "new",
                "max_concurrency and batch_size must be at least 1",
            ));
        }
        if self.elaboration_timeout.is_zero() {
            return Err(Error::invalid_config(
                "sot_agent",
                "new",
                "elaboration_timeout must be positive",
            ));
        }
        Ok(())
    }
}

/// An agent that plans a skeleton, elaborates it with bounded
/// parallelism, and aggregates the result.
pub struct SotAgent {
    name: String,
    description: String,
    llm: Arc<dyn LlmClient>,
    config: SotConfig,
    callbacks: CallbackSet,
}

impl std::fmt::Debug for SotAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SotAgent")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SotAgent {
    /// Create an agent with default configuration.
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            description: "Decomposes a task into a skeleton of points and elaborates them in parallel".to_string(),
            llm,
            config: SotConfig::default(),
            callbacks: CallbackSet::new(),
        }
    }

    /// Replace the configuration. Validates bounds.
    pub fn with_config(mut self, config: SotConfig) -> Result<Self> {
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

    /// Replace the description used in routing catalogs.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    async fn run(&self, ctx: &RunContext, input: &AgentInput) -> Result<AgentOutput> {
        let started = Instant::now();
        self.callbacks.start(&self.name, input).await;

        let mut points = self.plan(ctx, input).await?;
        self.callbacks
            .agent_action(
                &self.name,
                "skeleton_parsed",
                &serde_json::json!({ "points": points.len() }),
            )
            .await;

        let levels = if self.config.dependency_aware {
            group_by_dependency_level(&points)?
        } else {
            vec![(0..points.len()).collect()]
        };

        self.elaborate_levels(ctx, &input.task, &mut points, &levels)
            .await?;

        let output = self.aggregate(&points, started);
        self.callbacks.end(&self.name, &output).await;
        Ok(output)
    }

    /// Produce the skeleton, either by asking the LLM or directly.
    async fn plan(&self, ctx: &RunContext, input: &AgentInput) -> Result<Vec<SkeletonPoint>> {
        if !self.config.auto_decompose {
            return Ok(default_skeleton(&input.task));
        }

        let prompt = self.skeleton_prompt(input);
        let messages = [Message::user(prompt)];
        self.callbacks.llm_start(&self.name, &messages).await;
        let response = self.llm.chat(ctx, &messages).await?;
        self.callbacks.llm_end(&self.name, &response).await;

        let mut points = parse_skeleton(&response.content);
        if points.len() < self.config.min_points {
            tracing::debug!(
                agent = %self.name,
                parsed = points.len(),
                min = self.config.min_points,
                "skeleton too small; using default"
            );
            points = default_skeleton(&input.task);
        }
        points.truncate(self.config.max_points);
        Ok(points)
    }

    fn skeleton_prompt(&self, input: &AgentInput) -> String {
        let mut prompt = String::new();
        if let Some(instruction) = &input.instruction {
            let _ = writeln!(prompt, "{instruction}\n");
        }
        let _ = writeln!(
            prompt,
            "Break the following task into {}-{} skeleton points.",
            self.config.min_points, self.config.max_points
        );
        let _ = writeln!(
            prompt,
            "Respond with one numbered line per point, formatted as \
             `N. [Title]: Description`. If a point builds on earlier \
             points, append `Depends on: <numbers>`.\n"
        );
        let _ = write!(prompt, "Task: {}", input.task);
        prompt
    }

    fn elaboration_prompt(
        &self,
        task: &str,
        point: &SkeletonPoint,
        dependency_context: &[(String, String)],
    ) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Task: {task}\n");
        if !dependency_context.is_empty() {
            let _ = writeln!(prompt, "Context from completed dependencies:");
            for (title, elaboration) in dependency_context {
                let _ = writeln!(prompt, "- {title}: {elaboration}");
            }
            let _ = writeln!(prompt);
        }
        let _ = write!(
            prompt,
            "Elaborate the point \"{}\"{}{}",
            point.title,
            if point.description.is_empty() { "" } else { ": " },
            point.description
        );
        prompt
    }

    /// Elaborate level by level. Points within a level run concurrently,
    /// bounded by the semaphore and chunked by `batch_size`; levels are
    /// sequential join points.
    async fn elaborate_levels(
        &self,
        ctx: &RunContext,
        task: &str,
        points: &mut [SkeletonPoint],
        levels: &[Vec<usize>],
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        for level in levels {
            ctx.ensure_active("sot_agent", "elaborate")?;

            // Points with a failed dependency fail without an LLM call.
            let mut runnable: Vec<usize> = Vec::new();
            for &index in level {
                let failed_dep = points[index].dependencies.iter().find(|dep| {
                    points
                        .iter()
                        .any(|p| p.id == **dep && p.status == PointStatus::Failed)
                });
                if let Some(dep) = failed_dep {
                    let dep = dep.clone();
                    points[index].fail(format!("dependency '{dep}' failed"));
                } else {
                    points[index].status = PointStatus::Running;
                    runnable.push(index);
                }
            }

            for chunk in runnable.chunks(self.config.batch_size) {
                let jobs = chunk.iter().map(|&index| {
                    let point = &points[index];
                    let dependency_context: Vec<(String, String)> = point
                        .dependencies
                        .iter()
                        .filter_map(|dep| {
                            points.iter().find(|p| {
                                p.id == *dep && p.status == PointStatus::Completed
                            })
                        })
                        .map(|p| {
                            (
                                p.title.clone(),
                                p.elaboration.clone().unwrap_or_default(),
                            )
                        })
                        .collect();
                    let prompt = self.elaboration_prompt(task, point, &dependency_context);
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit =
                            semaphore.acquire().await.expect("semaphore never closed");
                        (index, self.elaborate_one(ctx, prompt).await)
                    }
                });

                let results = futures::future::join_all(jobs).await;
                for (index, result) in results {
                    match result {
                        Ok(elaboration) => points[index].complete(elaboration)?,
                        Err(error) => {
                            tracing::warn!(
                                agent = %self.name,
                                point = %points[index].id,
                                error = %error,
                                "elaboration failed"
                            );
                            points[index].fail(error.to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn elaborate_one(&self, ctx: &RunContext, prompt: String) -> Result<String> {
        let scoped = ctx.with_timeout(self.config.elaboration_timeout);
        let messages = [Message::user(prompt)];
        self.callbacks.llm_start(&self.name, &messages).await;

        let response = match tokio::time::timeout(
            self.config.elaboration_timeout,
            self.llm.chat(&scoped, &messages),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::new(
                    ErrorCode::LlmTimeout,
                    "sot_agent",
                    "elaborate",
                    format!(
                        "elaboration timed out after {:?}",
                        self.config.elaboration_timeout
                    ),
                ));
            }
        };
        self.callbacks.llm_end(&self.name, &response).await;

        if response.content.is_empty() {
            return Err(Error::new(
                ErrorCode::AgentExecution,
                "sot_agent",
                "elaborate",
                "model returned an empty elaboration",
            ));
        }
        Ok(response.content)
    }

    fn aggregate(&self, points: &[SkeletonPoint], started: Instant) -> AgentOutput {
        let completed = points
            .iter()
            .filter(|p| p.status == PointStatus::Completed)
            .count();
        let failed: Vec<String> = points
            .iter()
            .filter(|p| p.status == PointStatus::Failed)
            .map(|p| {
                format!(
                    "{}: {}",
                    p.id,
                    p.metadata
                        .get("error")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("failed")
                )
            })
            .collect();

        let text = match self.config.aggregation {
            AggregationMode::Sequential => aggregate_sequential(points),
            AggregationMode::Hierarchical => aggregate_hierarchical(points),
        };

        let mut output = if failed.is_empty() {
            AgentOutput::success(text)
        } else if completed == 0 {
            AgentOutput::failed("every skeleton point failed to elaborate")
        } else {
            AgentOutput::partial(text, failed)
        };

        output.reasoning_steps = points
            .iter()
            .map(|p| match &p.elaboration {
                Some(elaboration) => ReasoningStep::with_output(p.title.clone(), elaboration),
                None => ReasoningStep::new(p.title.clone()),
            })
            .collect();
        output
            .with_metadata("skeleton_points", points.len())
            .with_metadata("completed_points", completed)
            .with_latency(started.elapsed())
    }
}

fn aggregate_sequential(points: &[SkeletonPoint]) -> String {
    points
        .iter()
        .map(|p| {
            format!(
                "{}\n{}",
                p.title,
                p.elaboration.as_deref().unwrap_or("(not elaborated)")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn aggregate_hierarchical(points: &[SkeletonPoint]) -> String {
    fn walk(out: &mut String, point: &SkeletonPoint, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{indent}- {}: {}",
            point.title,
            point.elaboration.as_deref().unwrap_or("(not elaborated)")
        );
        for sub in &point.sub_points {
            walk(out, sub, depth + 1);
        }
    }

    let mut out = String::from("Hierarchical analysis\n");
    for point in points {
        walk(&mut out, point, 0);
    }
    out
}

#[async_trait]
impl Agent for SotAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["planning".to_string(), "decomposition".to_string()]
    }

    async fn execute(&self, ctx: &RunContext, input: AgentInput) -> Result<AgentOutput> {
        self.run(ctx, &input).await
    }
}

#[async_trait]
impl Runnable for SotAgent {
    type Input = AgentInput;
    type Output = AgentOutput;

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &RunContext, input: AgentInput) -> Result<AgentOutput> {
        self.run(ctx, &input).await
    }
}
