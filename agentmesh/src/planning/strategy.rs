//! Plan refinement strategies.
//!
//! Each strategy transforms a plan into an equivalent refined plan: the
//! same goal, with steps split, reordered, or re-staged but never
//! dropped.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

use super::{Plan, PlanStep};

/// Transforms a plan into an equivalent refined plan.
pub trait PlanningStrategy: Send + Sync {
    /// Strategy name for logs and reports.
    fn name(&self) -> &str;

    /// Refine `plan`.
    fn refine(&self, plan: Plan) -> Result<Plan>;
}

/// Splits compound steps into sequenced sub-steps.
///
/// A step whose description chains clauses with `;` becomes one step per
/// clause, each depending on the previous; steps that depended on the
/// original now depend on the last part.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecompositionStrategy;

impl PlanningStrategy for DecompositionStrategy {
    fn name(&self) -> &str {
        "decomposition"
    }

    fn refine(&self, plan: Plan) -> Result<Plan> {
        let mut last_part: HashMap<String, String> = HashMap::new();
        let mut steps: Vec<PlanStep> = Vec::new();

        for step in &plan.steps {
            let clauses: Vec<&str> = step
                .description
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            if clauses.len() < 2 {
                steps.push(step.clone());
                continue;
            }

            let mut previous: Option<String> = None;
            for (index, clause) in clauses.iter().enumerate() {
                let id = format!("{}_{}", step.id, index + 1);
                let mut dependencies = step.dependencies.clone();
                if let Some(prev) = &previous {
                    dependencies = vec![prev.clone()];
                }
                steps.push(
                    PlanStep::new(&id, format!("{} ({})", step.name, index + 1))
                        .with_description((*clause).to_string())
                        .with_type(step.step_type.clone())
                        .with_priority(step.priority)
                        .with_estimate(step.estimated_duration / clauses.len() as u32)
                        .with_dependencies(dependencies),
                );
                previous = Some(id);
            }
            last_part.insert(step.id.clone(), previous.expect("at least one clause"));
        }

        // Rewire references to split steps onto their final part.
        for step in &mut steps {
            for dep in &mut step.dependencies {
                if let Some(last) = last_part.get(dep) {
                    *dep = last.clone();
                }
            }
        }

        Ok(Plan { steps, ..plan })
    }
}

/// Reorders steps by chaining backward from the plan's terminal steps.
///
/// Terminal steps (those nothing depends on) are treated as the goals;
/// their prerequisite chains are emitted prerequisites-first. The result
/// is a dependency-consistent ordering of the same steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardChainingStrategy;

impl PlanningStrategy for BackwardChainingStrategy {
    fn name(&self) -> &str {
        "backward_chaining"
    }

    fn refine(&self, plan: Plan) -> Result<Plan> {
        let by_id: HashMap<&str, &PlanStep> =
            plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let depended_on: HashSet<&str> = plan
            .steps
            .iter()
            .flat_map(|s| s.dependencies.iter().map(String::as_str))
            .collect();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a PlanStep>,
            seen: &mut HashSet<&'a str>,
            in_progress: &mut HashSet<&'a str>,
            ordered: &mut Vec<PlanStep>,
        ) -> Result<()> {
            if seen.contains(id) {
                return Ok(());
            }
            if !in_progress.insert(id) {
                return Err(Error::invalid_input(
                    "planning",
                    "backward_chaining",
                    format!("dependency cycle through step '{id}'"),
                ));
            }
            let Some(step) = by_id.get(id) else {
                return Err(Error::invalid_input(
                    "planning",
                    "backward_chaining",
                    format!("unknown step '{id}' in dependencies"),
                ));
            };
            for dep in &step.dependencies {
                visit(dep, by_id, seen, in_progress, ordered)?;
            }
            in_progress.remove(id);
            seen.insert(id);
            ordered.push((*step).clone());
            Ok(())
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();
        let mut ordered: Vec<PlanStep> = Vec::new();

        // Chain backward from each terminal step, then pick up anything
        // disconnected in original order.
        for step in &plan.steps {
            if !depended_on.contains(step.id.as_str()) {
                visit(&step.id, &by_id, &mut seen, &mut in_progress, &mut ordered)?;
            }
        }
        for step in &plan.steps {
            visit(&step.id, &by_id, &mut seen, &mut in_progress, &mut ordered)?;
        }

        Ok(Plan {
            steps: ordered,
            ..plan
        })
    }
}

/// Re-stages steps by dependency depth.
///
/// Each step's priority becomes its longest-path depth (1-based), so
/// steps at the same depth share an execution stage. Step content is
/// unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchicalStrategy;

impl PlanningStrategy for HierarchicalStrategy {
    fn name(&self) -> &str {
        "hierarchical"
    }

    fn refine(&self, plan: Plan) -> Result<Plan> {
        let index_of: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        // Longest-path depth per step, iterated to fixpoint; a pass
        // count beyond the step count means a cycle.
        let mut depth: Vec<u32> = vec![1; plan.steps.len()];
        for pass in 0.. {
            if pass > plan.steps.len() {
                return Err(Error::invalid_input(
                    "planning",
                    "hierarchical",
                    "dependency cycle detected",
                ));
            }
            let mut changed = false;
            for (index, step) in plan.steps.iter().enumerate() {
                for dep in &step.dependencies {
                    let Some(&dep_index) = index_of.get(dep.as_str()) else {
                        return Err(Error::invalid_input(
                            "planning",
                            "hierarchical",
                            format!("unknown step '{dep}' in dependencies"),
                        ));
                    };
                    if depth[index] <= depth[dep_index] {
                        depth[index] = depth[dep_index] + 1;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut plan = plan;
        for (index, step) in plan.steps.iter_mut().enumerate() {
            step.priority = depth[index];
            step.parameters
                .insert("phase".to_string(), serde_json::Value::from(depth[index]));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn decomposition_splits_compound_steps() {
        let plan = Plan::new("goal")
            .with_step(
                PlanStep::new("s1", "prepare")
                    .with_description("fetch the data; clean the data")
                    .with_estimate(Duration::from_secs(60)),
            )
            .with_step(
                PlanStep::new("s2", "report").with_dependencies(vec!["s1".to_string()]),
            );

        let refined = DecompositionStrategy.refine(plan).unwrap();
        assert_eq!(refined.steps.len(), 3);
        assert_eq!(refined.steps[0].id, "s1_1");
        assert_eq!(refined.steps[1].dependencies, vec!["s1_1"]);
        // The dependent was rewired onto the last part.
        assert_eq!(refined.steps[2].dependencies, vec!["s1_2"]);
        assert_eq!(refined.steps[0].estimated_duration, Duration::from_secs(30));
    }

    #[test]
    fn decomposition_leaves_simple_steps_alone() {
        let plan = Plan::new("goal").with_step(
            PlanStep::new("s1", "simple").with_description("one thing"),
        );
        let refined = DecompositionStrategy.refine(plan).unwrap();
        assert_eq!(refined.steps.len(), 1);
        assert_eq!(refined.steps[0].id, "s1");
    }

    #[test]
    fn backward_chaining_orders_prerequisites_first() {
        // Declared goal-first: report depends on analyze depends on fetch.
        let plan = Plan::new("goal")
            .with_step(PlanStep::new("report", "report").with_dependencies(vec![
                "analyze".to_string(),
            ]))
            .with_step(PlanStep::new("analyze", "analyze").with_dependencies(vec![
                "fetch".to_string(),
            ]))
            .with_step(PlanStep::new("fetch", "fetch"));

        let refined = BackwardChainingStrategy.refine(plan).unwrap();
        let ids: Vec<&str> = refined.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["fetch", "analyze", "report"]);
    }

    #[test]
    fn backward_chaining_rejects_cycles() {
        let plan = Plan::new("goal")
            .with_step(PlanStep::new("a", "a").with_dependencies(vec!["b".to_string()]))
            .with_step(PlanStep::new("b", "b").with_dependencies(vec!["a".to_string()]));
        assert!(BackwardChainingStrategy.refine(plan).is_err());
    }

    #[test]
    fn hierarchical_assigns_depth_priorities() {
        let plan = Plan::new("goal")
            .with_step(PlanStep::new("root", "root"))
            .with_step(PlanStep::new("mid", "mid").with_dependencies(vec!["root".to_string()]))
            .with_step(
                PlanStep::new("leaf", "leaf").with_dependencies(vec![
                    "root".to_string(),
                    "mid".to_string(),
                ]),
            );

        let refined = HierarchicalStrategy.refine(plan).unwrap();
        assert_eq!(refined.steps[0].priority, 1);
        assert_eq!(refined.steps[1].priority, 2);
        assert_eq!(refined.steps[2].priority, 3);
        assert_eq!(refined.steps[2].parameters["phase"], 3);
    }
}
