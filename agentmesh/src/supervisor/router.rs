//! Routing strategies for mapping tasks to sub-agents.
//!
//! A [`Router`] picks an agent name for a task from the currently
//! registered catalog. All strategies are safe under concurrent calls;
//! mutable state (counters, loads, score modifiers) sits behind atomics
//! or a mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::seq::IndexedRandom;

use crate::agent::AgentInfo;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::llm::LlmClient;
use crate::message::Message;

use super::task::Task;

/// Selects a sub-agent for a task.
#[async_trait]
pub trait Router: Send + Sync {
    /// Pick an agent from `agents` for `task`. Errors with
    /// `no agents available` on an empty catalog.
    async fn route(&self, ctx: &RunContext, task: &Task, agents: &[AgentInfo]) -> Result<String>;

    /// Feed execution feedback (`[0, 1]`) back into the strategy.
    fn update_routing(&self, _agent: &str, _feedback: f64) {}

    /// Signal that a routed task finished, releasing any capacity held.
    fn release_task(&self, _agent: &str) {}
}

/// A shared, thread-safe [`Router`] trait object.
pub type SharedRouter = Arc<dyn Router>;

fn ensure_agents(agents: &[AgentInfo], operation: &str) -> Result<()> {
    if agents.is_empty() {
        Err(Error::invalid_input(
            "router",
            operation,
            "no agents available",
        ))
    } else {
        Ok(())
    }
}

/// Asks an LLM to pick from the agent catalog.
///
/// The prompt lists each agent's name and description together with the
/// task type and description; an unrecognized reply falls back to the
/// first available agent.
pub struct LlmRouter {
    llm: Arc<dyn LlmClient>,
}

impl std::fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRouter").finish_non_exhaustive()
    }
}

impl LlmRouter {
    /// Create an LLM-backed router.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn route(&self, ctx: &RunContext, task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;

        let catalog: String = agents
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Pick the best agent for the task below. Reply with the agent \
             name only.\n\nAgents:\n{catalog}\n\nTask type: {}\nTask: {}",
            task.task_type, task.description
        );

        let response = self.llm.chat(ctx, &[Message::user(prompt)]).await?;
        let picked = response.content.trim();
        if let Some(agent) = agents.iter().find(|a| a.name == picked) {
            return Ok(agent.name.clone());
        }
        // Tolerate replies that embed the name in a sentence.
        if let Some(agent) = agents.iter().find(|a| picked.contains(&a.name)) {
            return Ok(agent.name.clone());
        }
        tracing::debug!(picked, "llm selection not in catalog; using first agent");
        Ok(agents[0].name.clone())
    }
}

/// One rule of a [`RuleRouter`].
pub struct RoutingRule {
    /// Predicate over the task.
    pub condition: Arc<dyn Fn(&Task) -> bool + Send + Sync>,
    /// Agent to route to when the predicate matches.
    pub agent_name: String,
    /// Evaluation priority; higher evaluates earlier.
    pub priority: i32,
}

impl std::fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRule")
            .field("agent_name", &self.agent_name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl RoutingRule {
    /// Create a rule.
    pub fn new<F>(condition: F, agent_name: impl Into<String>, priority: i32) -> Self
    where
        F: Fn(&Task) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: Arc::new(condition),
            agent_name: agent_name.into(),
            priority,
        }
    }
}

/// Routes by an ordered rule list; the first matching rule wins, with
/// ties broken by priority.
#[derive(Debug, Default)]
pub struct RuleRouter {
    rules: Mutex<Vec<RoutingRule>>,
}

impl RuleRouter {
    /// Create an empty rule router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, keeping the list sorted by descending priority
    /// (insertion order within equal priorities).
    pub fn add_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.lock().expect("rule list poisoned");
        rules.push(rule);
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }
}

#[async_trait]
impl Router for RuleRouter {
    async fn route(&self, _ctx: &RunContext, task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;

        let rules = self.rules.lock().expect("rule list poisoned");
        for rule in rules.iter() {
            if (rule.condition)(task) && agents.iter().any(|a| a.name == rule.agent_name) {
                return Ok(rule.agent_name.clone());
            }
        }
        Err(Error::invalid_input(
            "router",
            "route",
            format!("no rule matched task '{}'", task.id),
        ))
    }
}

/// Cycles through agents with a monotonic counter.
#[derive(Debug, Default)]
pub struct RoundRobinRouter {
    counter: AtomicUsize,
}

impl RoundRobinRouter {
    /// Create a round-robin router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Router for RoundRobinRouter {
    async fn route(&self, _ctx: &RunContext, _task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % agents.len();
        Ok(agents[index].name.clone())
    }
}

/// Routes to the agent whose capabilities best match the task, scaled by
/// a per-agent performance modifier learned from feedback.
#[derive(Debug)]
pub struct CapabilityRouter {
    modifiers: Mutex<HashMap<String, f64>>,
    /// EMA blend factor for feedback.
    alpha: f64,
}

impl Default for CapabilityRouter {
    fn default() -> Self {
        Self {
            modifiers: Mutex::new(HashMap::new()),
            alpha: 0.3,
        }
    }
}

impl CapabilityRouter {
    /// Create a capability router with the default blend factor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capability router with an explicit EMA blend factor.
    #[must_use]
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            modifiers: Mutex::new(HashMap::new()),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Fraction of the agent's capabilities that the task mentions.
    fn score(task: &Task, agent: &AgentInfo) -> f64 {
        if agent.capabilities.is_empty() {
            return 0.0;
        }
        let haystack = format!("{} {}", task.task_type, task.description).to_lowercase();
        let matched = agent
            .capabilities
            .iter()
            .filter(|cap| haystack.contains(cap.to_lowercase().as_str()))
            .count();
        matched as f64 / agent.capabilities.len() as f64
    }

    fn modifier(&self, agent: &str) -> f64 {
        *self
            .modifiers
            .lock()
            .expect("modifier map poisoned")
            .get(agent)
            .unwrap_or(&1.0)
    }
}

#[async_trait]
impl Router for CapabilityRouter {
    async fn route(&self, _ctx: &RunContext, task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;

        let best = agents
            .iter()
            .map(|agent| (agent, Self::score(task, agent) * self.modifier(&agent.name)))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((agent, score)) if score > 0.0 => Ok(agent.name.clone()),
            // Nothing matched; the first agent is the neutral choice.
            _ => Ok(agents[0].name.clone()),
        }
    }

    fn update_routing(&self, agent: &str, feedback: f64) {
        let mut modifiers = self.modifiers.lock().expect("modifier map poisoned");
        let old = modifiers.get(agent).copied().unwrap_or(1.0);
        let new = self.alpha * feedback + (1.0 - self.alpha) * old;
        modifiers.insert(agent.to_string(), new);
    }
}

/// Routes to the least-loaded agent with remaining capacity.
#[derive(Debug)]
pub struct LoadBalancedRouter {
    loads: Mutex<HashMap<String, usize>>,
    max_per_agent: usize,
}

impl LoadBalancedRouter {
    /// Create a router allowing up to `max_per_agent` in-flight tasks
    /// per agent.
    #[must_use]
    pub fn new(max_per_agent: usize) -> Self {
        Self {
            loads: Mutex::new(HashMap::new()),
            max_per_agent: max_per_agent.max(1),
        }
    }

    /// Current in-flight count for an agent.
    #[must_use]
    pub fn load_of(&self, agent: &str) -> usize {
        *self
            .loads
            .lock()
            .expect("load map poisoned")
            .get(agent)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl Router for LoadBalancedRouter {
    async fn route(&self, _ctx: &RunContext, _task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;

        let mut loads = self.loads.lock().expect("load map poisoned");
        let chosen = agents
            .iter()
            .map(|agent| (agent, *loads.get(&agent.name).unwrap_or(&0)))
            .filter(|(_, load)| *load < self.max_per_agent)
            .min_by_key(|(_, load)| *load);

        match chosen {
            Some((agent, _)) => {
                *loads.entry(agent.name.clone()).or_insert(0) += 1;
                Ok(agent.name.clone())
            }
            None => Err(Error::new(
                ErrorCode::RouterAtCapacity,
                "router",
                "route",
                "every agent is at capacity",
            )),
        }
    }

    fn release_task(&self, agent: &str) {
        let mut loads = self.loads.lock().expect("load map poisoned");
        if let Some(load) = loads.get_mut(agent) {
            *load = load.saturating_sub(1);
        }
    }
}

/// Picks uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomRouter;

impl RandomRouter {
    /// Create a random router.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Router for RandomRouter {
    async fn route(&self, _ctx: &RunContext, _task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;
        let agent = agents
            .choose(&mut rand::rng())
            .expect("catalog is non-empty");
        Ok(agent.name.clone())
    }
}

/// Combines several strategies as weighted votes, with a designated
/// fallback when every primary strategy abstains (errors).
pub struct HybridRouter {
    strategies: Vec<(SharedRouter, f64)>,
    fallback: SharedRouter,
}

impl std::fmt::Debug for HybridRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRouter")
            .field("strategies", &self.strategies.len())
            .finish_non_exhaustive()
    }
}

impl HybridRouter {
    /// Create a hybrid router over `strategies` with `fallback`.
    #[must_use]
    pub fn new(strategies: Vec<(SharedRouter, f64)>, fallback: SharedRouter) -> Self {
        Self {
            strategies,
            fallback,
        }
    }
}

#[async_trait]
impl Router for HybridRouter {
    async fn route(&self, ctx: &RunContext, task: &Task, agents: &[AgentInfo]) -> Result<String> {
        ensure_agents(agents, "route")?;

        let mut votes: HashMap<String, f64> = HashMap::new();
        for (strategy, weight) in &self.strategies {
            match strategy.route(ctx, task, agents).await {
                Ok(agent) => *votes.entry(agent).or_insert(0.0) += weight,
                Err(error) => {
                    tracing::debug!(error = %error, "hybrid sub-strategy abstained");
                }
            }
        }

        let winner = votes
            .into_iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        match winner {
            Some((agent, _)) => Ok(agent),
            None => self.fallback.route(ctx, task, agents).await,
        }
    }

    fn update_routing(&self, agent: &str, feedback: f64) {
        for (strategy, _) in &self.strategies {
            strategy.update_routing(agent, feedback);
        }
        self.fallback.update_routing(agent, feedback);
    }

    fn release_task(&self, agent: &str) {
        for (strategy, _) in &self.strategies {
            strategy.release_task(agent);
        }
        self.fallback.release_task(agent);
    }
}
