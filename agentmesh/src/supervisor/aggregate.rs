//! Aggregation strategies over task results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::TaskResult;

/// How a supervisor combines its sub-agents' results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// `{results, errors}`, preserving input order.
    #[default]
    Merge,
    /// The single result with the highest confidence.
    Best,
    /// The majority value over stringified outputs; ties break by
    /// highest mean confidence.
    Consensus,
    /// A map from agent name to that agent's results.
    Hierarchy,
}

/// Combine `results` under `strategy`.
#[must_use]
pub fn aggregate(strategy: AggregationStrategy, results: &[TaskResult]) -> Value {
    match strategy {
        AggregationStrategy::Merge => merge(results),
        AggregationStrategy::Best => best(results),
        AggregationStrategy::Consensus => consensus(results),
        AggregationStrategy::Hierarchy => hierarchy(results),
    }
}

fn merge(results: &[TaskResult]) -> Value {
    let outputs: Vec<&Value> = results.iter().map(|r| &r.output).collect();
    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| {
            r.error
                .as_ref()
                .map(|error| format!("{}: {error}", r.task_id))
        })
        .collect();
    serde_json::json!({ "results": outputs, "errors": errors })
}

fn best(results: &[TaskResult]) -> Value {
    results
        .iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(Value::Null, |winner| {
            serde_json::to_value(winner).unwrap_or(Value::Null)
        })
}

fn consensus(results: &[TaskResult]) -> Value {
    if results.is_empty() {
        return Value::Null;
    }

    // Group by stringified output, tracking first-seen order for the
    // final determinism tiebreak.
    struct Group<'a> {
        output: &'a Value,
        votes: usize,
        confidence_sum: f64,
        first_seen: usize,
    }

    let mut groups: HashMap<String, Group<'_>> = HashMap::new();
    for (position, result) in results.iter().enumerate() {
        let key = result.output.to_string();
        let group = groups.entry(key).or_insert(Group {
            output: &result.output,
            votes: 0,
            confidence_sum: 0.0,
            first_seen: position,
        });
        group.votes += 1;
        group.confidence_sum += result.confidence;
    }

    let winner = groups.values().max_by(|a, b| {
        let mean_a = a.confidence_sum / a.votes as f64;
        let mean_b = b.confidence_sum / b.votes as f64;
        a.votes
            .cmp(&b.votes)
            .then(
                mean_a
                    .partial_cmp(&mean_b)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            // Earlier first-seen wins a full tie.
            .then(b.first_seen.cmp(&a.first_seen))
    });
    winner.map_or(Value::Null, |group| group.output.clone())
}

fn hierarchy(results: &[TaskResult]) -> Value {
    let mut by_agent: HashMap<&str, Vec<&Value>> = HashMap::new();
    for result in results {
        by_agent
            .entry(result.agent_name.as_str())
            .or_default()
            .push(&result.output);
    }
    serde_json::to_value(by_agent).unwrap_or(Value::Null)
}
