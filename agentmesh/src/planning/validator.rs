//! Plan validators.
//!
//! Validators run in sequence and each contributes `(valid, issues)`;
//! overall validity is the AND across all of them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Plan;

/// Outcome of validating a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the plan passed.
    pub valid: bool,
    /// Human-readable problems found.
    pub issues: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    fn failed(issues: Vec<String>) -> Self {
        Self {
            valid: false,
            issues,
        }
    }
}

/// Checks one structural or resource property of a plan.
pub trait PlanValidator: Send + Sync {
    /// Validator name, used to prefix reported issues.
    fn name(&self) -> &str;

    /// Validate `plan`.
    fn validate(&self, plan: &Plan) -> ValidationReport;
}

/// Run `validators` in sequence; overall validity is the AND.
#[must_use]
pub fn validate_all(validators: &[Box<dyn PlanValidator>], plan: &Plan) -> ValidationReport {
    let mut combined = ValidationReport::ok();
    for validator in validators {
        let report = validator.validate(plan);
        combined.valid &= report.valid;
        combined
            .issues
            .extend(report.issues.into_iter().map(|issue| {
                format!("{}: {issue}", validator.name())
            }));
    }
    combined
}

/// Checks that step ids are unique, every dependency resolves, and the
/// dependency graph is acyclic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyValidator;

impl PlanValidator for DependencyValidator {
    fn name(&self) -> &str {
        "dependency"
    }

    fn validate(&self, plan: &Plan) -> ValidationReport {
        let mut issues = Vec::new();

        let mut ids: HashSet<&str> = HashSet::new();
        for step in &plan.steps {
            if !ids.insert(step.id.as_str()) {
                issues.push(format!("duplicate step id '{}'", step.id));
            }
        }
        for step in &plan.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    issues.push(format!("step '{}' depends on itself", step.id));
                } else if !ids.contains(dep.as_str()) {
                    issues.push(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    ));
                }
            }
        }

        if issues.is_empty() && has_cycle(plan) {
            issues.push("dependency cycle detected".to_string());
        }

        if issues.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(issues)
        }
    }
}

fn has_cycle(plan: &Plan) -> bool {
    // Kahn's algorithm; leftover steps mean a cycle.
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &plan.steps {
        indegree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.dependencies {
            *indegree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut processed = 0;
    while let Some(id) = ready.pop() {
        processed += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = indegree.get_mut(dependent).expect("known step");
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }
    processed != plan.steps.len()
}

/// Checks declared resource usage against the plan's limits.
///
/// Steps declare usage in `parameters["resources"]` (a map of resource
/// name to amount); the plan declares limits in
/// `constraints["resource_limits"]`. Total usage per resource must stay
/// within its limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceValidator;

impl PlanValidator for ResourceValidator {
    fn name(&self) -> &str {
        "resource"
    }

    fn validate(&self, plan: &Plan) -> ValidationReport {
        let Some(limits) = plan
            .constraints
            .get("resource_limits")
            .and_then(Value::as_object)
        else {
            return ValidationReport::ok();
        };

        let mut usage: HashMap<&str, f64> = HashMap::new();
        for step in &plan.steps {
            if let Some(resources) = step.parameters.get("resources").and_then(Value::as_object) {
                for (resource, amount) in resources {
                    *usage.entry(resource.as_str()).or_insert(0.0) +=
                        amount.as_f64().unwrap_or(0.0);
                }
            }
        }

        let mut issues = Vec::new();
        for (resource, limit) in limits {
            let used = usage.get(resource.as_str()).copied().unwrap_or(0.0);
            let allowed = limit.as_f64().unwrap_or(f64::INFINITY);
            if used > allowed {
                issues.push(format!(
                    "resource '{resource}' over limit: {used} > {allowed}"
                ));
            }
        }

        if issues.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(issues)
        }
    }
}

/// Checks the estimated total duration against the plan's deadline
/// (`constraints["deadline_secs"]`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeValidator;

impl PlanValidator for TimeValidator {
    fn name(&self) -> &str {
        "time"
    }

    fn validate(&self, plan: &Plan) -> ValidationReport {
        let Some(deadline_secs) = plan
            .constraints
            .get("deadline_secs")
            .and_then(Value::as_f64)
        else {
            return ValidationReport::ok();
        };

        let total = plan.estimated_total();
        let deadline = Duration::from_secs_f64(deadline_secs.max(0.0));
        if total > deadline {
            ValidationReport::failed(vec![format!(
                "estimated total {total:?} exceeds deadline {deadline:?}"
            )])
        } else {
            ValidationReport::ok()
        }
    }
}
