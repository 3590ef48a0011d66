//! Plan optimization.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::{Plan, PlanStep};

/// Collapses duplicate adjacent steps and marks independent steps for
/// parallel execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptimizer;

impl PlanOptimizer {
    /// Create an optimizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Optimize `plan`.
    ///
    /// Identical adjacent steps (same name, type, and description)
    /// collapse into one, folding their duration estimates together and
    /// rewiring dependency references onto the survivor. Steps with no
    /// dependency relation to any other step get
    /// `parameters["parallel"] = true`.
    #[must_use]
    pub fn optimize(&self, plan: Plan) -> Plan {
        let mut plan = self.collapse_adjacent(plan);
        self.mark_parallel(&mut plan);
        plan
    }

    fn collapse_adjacent(&self, plan: Plan) -> Plan {
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut renamed: HashMap<String, String> = HashMap::new();

        for step in plan.steps {
            match steps.last_mut() {
                Some(previous)
                    if previous.name == step.name
                        && previous.step_type == step.step_type
                        && previous.description == step.description =>
                {
                    previous.estimated_duration += step.estimated_duration;
                    // Keep the union of both steps' dependencies.
                    for dep in step.dependencies {
                        if dep != previous.id && !previous.dependencies.contains(&dep) {
                            previous.dependencies.push(dep);
                        }
                    }
                    renamed.insert(step.id, previous.id.clone());
                }
                _ => steps.push(step),
            }
        }

        for step in &mut steps {
            for dep in &mut step.dependencies {
                if let Some(survivor) = renamed.get(dep) {
                    *dep = survivor.clone();
                }
            }
            step.dependencies.dedup();
        }

        Plan { steps, ..plan }
    }

    fn mark_parallel(&self, plan: &mut Plan) {
        let depended_on: HashSet<String> = plan
            .steps
            .iter()
            .flat_map(|s| s.dependencies.iter().cloned())
            .collect();

        for step in &mut plan.steps {
            if step.dependencies.is_empty() && !depended_on.contains(&step.id) {
                step.parameters
                    .insert("parallel".to_string(), Value::Bool(true));
            }
        }
    }
}
