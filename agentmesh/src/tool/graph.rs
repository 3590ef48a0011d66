//! Dependency-ordered tool execution.
//!
//! A [`ToolGraph`] holds tool calls keyed by id with explicit dependency
//! edges and evaluates them in topological "waves": each node's wave index
//! is its longest path from any root, nodes sharing an index run in
//! parallel through the [`ToolExecutor`], and waves run in order. A failed
//! node marks its transitive dependents `Skipped`.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::context::RunContext;
use crate::error::{Error, Result};

use super::executor::{ToolExecutor, ToolInvocation};
use super::{ToolInput, ToolOutput};

/// Lifecycle of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not yet scheduled.
    Pending,
    /// Submitted to the executor.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not run because a transitive dependency failed.
    Skipped,
}

/// One tool call in the graph.
#[derive(Debug, Clone)]
pub struct ToolNode {
    /// Unique node id.
    pub id: String,
    /// Tool to invoke.
    pub tool_name: String,
    /// Input for the call.
    pub input: ToolInput,
    /// Ids of nodes this call depends on.
    pub deps: HashSet<String>,
    /// Current lifecycle state.
    pub status: NodeStatus,
    /// Output once completed.
    pub output: Option<ToolOutput>,
    /// Error text once failed.
    pub error: Option<String>,
    /// Retries consumed by the executor for this node.
    pub retry_count: u32,
    /// Retry budget (from the executor's policy).
    pub max_retries: u32,
    /// When the node was submitted.
    pub started_at: Option<Instant>,
    /// When the node reached a terminal state.
    pub completed_at: Option<Instant>,
}

/// Configuration for graph execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphConfig {
    /// Stop scheduling further waves after the first failed wave; nodes
    /// that never ran are marked `Skipped`.
    pub cancel_on_failure: bool,
}

/// Summary of one graph run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphRunSummary {
    /// Nodes that completed.
    pub completed: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes skipped because of upstream failures.
    pub skipped: usize,
}

/// A DAG of tool calls.
#[derive(Debug, Clone, Default)]
pub struct ToolGraph {
    nodes: HashMap<String, ToolNode>,
    insertion: Vec<String>,
    config: GraphConfig,
}

impl ToolGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with explicit configuration.
    #[must_use]
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Add a tool call. Dependencies may reference nodes added later;
    /// they are validated when waves are computed.
    pub fn add_call(
        &mut self,
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: ToolInput,
        deps: Vec<String>,
    ) -> Result<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(Error::invalid_input(
                "tool_graph",
                "add_call",
                format!("duplicate node id '{id}'"),
            ));
        }
        if deps.iter().any(|dep| *dep == id) {
            return Err(Error::invalid_input(
                "tool_graph",
                "add_call",
                format!("node '{id}' depends on itself"),
            ));
        }
        self.insertion.push(id.clone());
        self.nodes.insert(
            id.clone(),
            ToolNode {
                id,
                tool_name: tool_name.into(),
                input,
                deps: deps.into_iter().collect(),
                status: NodeStatus::Pending,
                output: None,
                error: None,
                retry_count: 0,
                max_retries: 0,
                started_at: None,
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ToolNode> {
        self.nodes.get(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Group node ids into waves by longest path from any root.
    ///
    /// Unknown dependency references and cycles are build errors.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        for node in self.nodes.values() {
            for dep in &node.deps {
                if !self.nodes.contains_key(dep) {
                    return Err(Error::invalid_input(
                        "tool_graph",
                        "waves",
                        format!("node '{}' depends on unknown node '{dep}'", node.id),
                    ));
                }
            }
        }

        // Kahn's algorithm, tracking the longest path as the wave index.
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in self.nodes.values() {
            indegree.entry(node.id.as_str()).or_insert(0);
            for dep in &node.deps {
                *indegree.entry(node.id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(node.id.as_str());
            }
        }

        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &ready {
            level.insert(id, 0);
        }

        let mut processed = 0;
        while let Some(id) = ready.pop() {
            processed += 1;
            let current = level[id];
            for dependent in dependents.get(id).into_iter().flatten() {
                let entry = level.entry(dependent).or_insert(0);
                *entry = (*entry).max(current + 1);
                let degree = indegree.get_mut(dependent).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }

        if processed != self.nodes.len() {
            return Err(Error::invalid_input(
                "tool_graph",
                "waves",
                "dependency cycle detected",
            ));
        }

        let wave_count = level.values().copied().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
        // Insertion order keeps wave contents deterministic.
        for id in &self.insertion {
            waves[level[id.as_str()]].push(id.clone());
        }
        Ok(waves)
    }

    /// Execute the graph through `executor`.
    ///
    /// Each wave is submitted as one batch; the next wave starts only
    /// after the previous one fully settles.
    pub async fn execute(
        &mut self,
        ctx: &RunContext,
        executor: &ToolExecutor,
    ) -> Result<GraphRunSummary> {
        let waves = self.waves()?;
        let max_retries = executor.config().retry.max_retries;
        let mut summary = GraphRunSummary::default();
        let mut halted = false;

        for wave in waves {
            if halted || ctx.is_cancelled() {
                for id in &wave {
                    let node = self.nodes.get_mut(id).expect("known node");
                    node.status = NodeStatus::Skipped;
                    summary.skipped += 1;
                }
                continue;
            }

            // Partition the wave: nodes with a failed or skipped upstream
            // are skipped, the rest run in parallel.
            let mut runnable: Vec<String> = Vec::new();
            for id in &wave {
                let blocked = self.nodes[id].deps.iter().any(|dep| {
                    matches!(
                        self.nodes[dep].status,
                        NodeStatus::Failed | NodeStatus::Skipped
                    )
                });
                let node = self.nodes.get_mut(id).expect("known node");
                if blocked {
                    node.status = NodeStatus::Skipped;
                    summary.skipped += 1;
                } else {
                    node.status = NodeStatus::Running;
                    node.started_at = Some(Instant::now());
                    node.max_retries = max_retries;
                    runnable.push(id.clone());
                }
            }
            if runnable.is_empty() {
                continue;
            }

            let calls: Vec<ToolInvocation> = runnable
                .iter()
                .map(|id| {
                    let node = &self.nodes[id];
                    ToolInvocation::new(node.tool_name.clone(), node.input.clone())
                })
                .collect();

            let results = executor.execute(ctx, calls).await?;
            let mut wave_failed = false;
            for (id, result) in runnable.iter().zip(results) {
                let node = self.nodes.get_mut(id).expect("known node");
                node.completed_at = Some(Instant::now());
                match result {
                    Ok(output) if output.success => {
                        node.status = NodeStatus::Completed;
                        node.output = Some(output);
                        summary.completed += 1;
                    }
                    Ok(output) => {
                        node.status = NodeStatus::Failed;
                        node.error = output.error.clone();
                        node.output = Some(output);
                        summary.failed += 1;
                        wave_failed = true;
                    }
                    Err(error) => {
                        if let Some(attempts) = error
                            .context
                            .get("retry_attempt")
                            .and_then(serde_json::Value::as_u64)
                        {
                            node.retry_count = (attempts as u32).saturating_sub(1);
                        }
                        node.status = NodeStatus::Failed;
                        node.error = Some(error.to_string());
                        summary.failed += 1;
                        wave_failed = true;
                    }
                }
            }

            if wave_failed && self.config.cancel_on_failure {
                halted = true;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::tool::executor::ExecutorConfig;
    use crate::tool::testing::{EchoTool, FlakyTool};
    use crate::tool::ToolSet;
    use std::sync::Arc;

    fn echo_executor() -> ToolExecutor {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(EchoTool::new()));
        tools.add(Arc::new(FlakyTool::new("broken", 99, "permanent damage")));
        ToolExecutor::new(
            tools,
            ExecutorConfig {
                retry: RetryPolicy::none(),
                ..ExecutorConfig::default()
            },
        )
        .expect("valid config")
    }

    fn input(value: &str) -> ToolInput {
        ToolInput::new().with_arg("input", value)
    }

    #[test]
    fn waves_follow_longest_paths() {
        // p1 → {p2, p3} → p4: three waves with p2 and p3 together.
        let mut graph = ToolGraph::new();
        graph.add_call("p1", "echo", input("1"), vec![]).unwrap();
        graph
            .add_call("p2", "echo", input("2"), vec!["p1".to_string()])
            .unwrap();
        graph
            .add_call("p3", "echo", input("3"), vec!["p1".to_string()])
            .unwrap();
        graph
            .add_call(
                "p4",
                "echo",
                input("4"),
                vec!["p2".to_string(), "p3".to_string()],
            )
            .unwrap();

        let waves = graph.waves().unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["p1"]);
        assert_eq!(waves[1], vec!["p2", "p3"]);
        assert_eq!(waves[2], vec!["p4"]);
    }

    #[test]
    fn cycles_are_reported_at_build_time() {
        let mut graph = ToolGraph::new();
        graph
            .add_call("a", "echo", input("a"), vec!["b".to_string()])
            .unwrap();
        graph
            .add_call("b", "echo", input("b"), vec!["a".to_string()])
            .unwrap();

        let err = graph.waves().unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let mut graph = ToolGraph::new();
        graph
            .add_call("a", "echo", input("a"), vec!["ghost".to_string()])
            .unwrap();
        assert!(graph.waves().is_err());
    }

    #[tokio::test]
    async fn dependencies_complete_before_dependents_start() {
        let mut graph = ToolGraph::new();
        graph.add_call("a", "echo", input("a"), vec![]).unwrap();
        graph
            .add_call("b", "echo", input("b"), vec!["a".to_string()])
            .unwrap();

        let ctx = RunContext::new();
        let summary = graph.execute(&ctx, &echo_executor()).await.unwrap();
        assert_eq!(summary.completed, 2);

        let a = graph.node("a").unwrap();
        let b = graph.node("b").unwrap();
        assert_eq!(a.status, NodeStatus::Completed);
        assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
    }

    #[tokio::test]
    async fn failures_skip_transitive_dependents() {
        let mut graph = ToolGraph::new();
        graph.add_call("ok", "echo", input("x"), vec![]).unwrap();
        graph.add_call("bad", "broken", input("y"), vec![]).unwrap();
        graph
            .add_call("child", "echo", input("z"), vec!["bad".to_string()])
            .unwrap();
        graph
            .add_call("grandchild", "echo", input("w"), vec!["child".to_string()])
            .unwrap();

        let ctx = RunContext::new();
        let summary = graph.execute(&ctx, &echo_executor()).await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(graph.node("child").unwrap().status, NodeStatus::Skipped);
        assert_eq!(
            graph.node("grandchild").unwrap().status,
            NodeStatus::Skipped
        );
    }

    #[tokio::test]
    async fn cancel_on_failure_halts_later_waves() {
        let mut graph = ToolGraph::with_config(GraphConfig {
            cancel_on_failure: true,
        });
        graph.add_call("bad", "broken", input("y"), vec![]).unwrap();
        // Independent of `bad`, but scheduled in a later wave.
        graph.add_call("a", "echo", input("a"), vec![]).unwrap();
        graph
            .add_call("b", "echo", input("b"), vec!["a".to_string()])
            .unwrap();

        let ctx = RunContext::new();
        let summary = graph.execute(&ctx, &echo_executor()).await.unwrap();

        // Wave 0 ran {bad, a}; wave 1 was halted.
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(graph.node("b").unwrap().status, NodeStatus::Skipped);
    }
}
