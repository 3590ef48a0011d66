//! Plan representation, refinement strategies, optimization, and
//! validation.
//!
//! A [`Plan`] is a goal plus an ordered list of [`PlanStep`]s with
//! dependencies and constraints. [`PlanningStrategy`] implementations
//! transform a plan into an equivalent refined plan; the
//! [`PlanOptimizer`] collapses duplicate adjacent steps and marks
//! independent steps for parallel execution; [`PlanValidator`]s check
//! structural and resource properties.

mod optimizer;
mod strategy;
mod validator;

pub use optimizer::PlanOptimizer;
pub use strategy::{
    BackwardChainingStrategy, DecompositionStrategy, HierarchicalStrategy, PlanningStrategy,
};
pub use validator::{
    DependencyValidator, PlanValidator, ResourceValidator, TimeValidator, ValidationReport,
    validate_all,
};

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique step id.
    pub id: String,
    /// Short name.
    pub name: String,
    /// What the step does.
    pub description: String,
    /// Step type consulted by routing and refinement.
    pub step_type: String,
    /// Ordering priority; lower runs earlier.
    pub priority: u32,
    /// Estimated wall-clock duration.
    pub estimated_duration: Duration,
    /// Ids of steps this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Free-form parameters (`"parallel"`, resource declarations, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
}

impl PlanStep {
    /// Create a `general` step with priority 1 and no estimate.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            step_type: "general".to_string(),
            priority: 1,
            estimated_duration: Duration::ZERO,
            dependencies: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the step type.
    #[must_use]
    pub fn with_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = step_type.into();
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the duration estimate.
    #[must_use]
    pub fn with_estimate(mut self, estimated_duration: Duration) -> Self {
        self.estimated_duration = estimated_duration;
        self
    }

    /// Attach dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Attach one parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A goal with an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id.
    pub id: String,
    /// What the plan achieves.
    pub goal: String,
    /// Steps in intended order.
    pub steps: Vec<PlanStep>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Constraints consulted by validators (`"deadline_secs"`,
    /// `"resource_limits"`, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub constraints: HashMap<String, Value>,
}

impl Plan {
    /// Create an empty plan for `goal` with a fresh id.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
            constraints: HashMap::new(),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Attach a constraint.
    #[must_use]
    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// Total of the step duration estimates.
    #[must_use]
    pub fn estimated_total(&self) -> Duration {
        self.steps.iter().map(|s| s.estimated_duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_builder_accumulates_steps_and_constraints() {
        let plan = Plan::new("ship the feature")
            .with_step(PlanStep::new("s1", "design").with_estimate(Duration::from_secs(60)))
            .with_step(PlanStep::new("s2", "build").with_estimate(Duration::from_secs(120)))
            .with_constraint("deadline_secs", 600);

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.estimated_total(), Duration::from_secs(180));
        assert_eq!(plan.constraints["deadline_secs"], 600);
        assert!(!plan.id.is_empty());
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = Plan::new("goal").with_step(
            PlanStep::new("s1", "step")
                .with_dependencies(vec!["s0".to_string()])
                .with_parameter("parallel", true),
        );
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();

        assert_eq!(back.goal, "goal");
        assert_eq!(back.steps[0].parameters["parallel"], true);
    }
}
