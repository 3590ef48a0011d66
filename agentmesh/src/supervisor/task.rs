//! Supervisor tasks and their results.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work routed to a sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Task type consulted by routing rules. Defaults to `"general"`.
    pub task_type: String,
    /// What needs to be done.
    pub description: String,
    /// Stage priority; lower numbers run earlier. Always positive.
    pub priority: u32,
    /// Ids of tasks this one depends on (informational for staging).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    /// Create a `general` task with priority 1.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: "general".to_string(),
            description: description.into(),
            priority: 1,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the task type.
    #[must_use]
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Set the stage priority (clamped to at least 1).
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority.max(1);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The outcome of executing one task on a sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Id of the executed task.
    pub task_id: String,
    /// Agent that handled it (empty when routing itself failed).
    pub agent_name: String,
    /// Result payload.
    pub output: Value,
    /// Error text when the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// Result confidence in `[0, 1]`.
    pub confidence: f64,
}

impl TaskResult {
    /// Whether the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Group tasks into execution stages by priority.
///
/// Stage order is ascending priority (priority 1 runs first); tasks
/// sharing a priority form one stage and keep their input order.
#[must_use]
pub fn group_into_stages(tasks: Vec<Task>) -> Vec<Vec<Task>> {
    let mut priorities: Vec<u32> = tasks.iter().map(|t| t.priority).collect();
    priorities.sort_unstable();
    priorities.dedup();

    let mut stages: Vec<Vec<Task>> = priorities.iter().map(|_| Vec::new()).collect();
    for task in tasks {
        let slot = priorities
            .binary_search(&task.priority)
            .expect("priority is present");
        stages[slot].push(task);
    }
    stages
}
