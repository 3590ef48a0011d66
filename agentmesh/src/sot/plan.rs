//! Skeleton points and dependency leveling.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Lifecycle of one skeleton point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointStatus {
    /// Not yet elaborated.
    Pending,
    /// Elaboration in flight.
    Running,
    /// Elaborated successfully.
    Completed,
    /// Elaboration failed (or an upstream dependency did).
    Failed,
}

/// One node of a Skeleton-of-Thought plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonPoint {
    /// Point id, `point_<index>` with a 1-based index.
    pub id: String,
    /// Short title.
    pub title: String,
    /// What this point should cover.
    pub description: String,
    /// Current lifecycle state.
    pub status: PointStatus,
    /// Ids of earlier points this one builds on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// The elaborated content, once completed. Never empty for a
    /// completed point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elaboration: Option<String>,
    /// Nested sub-points for hierarchical aggregation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_points: Vec<SkeletonPoint>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// When the point was created.
    pub created_at: DateTime<Utc>,
    /// When the point reached `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SkeletonPoint {
    /// Create a pending point.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: PointStatus::Pending,
            dependencies: Vec::new(),
            elaboration: None,
            sub_points: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Attach dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Transition to `Completed`. Rejects an empty elaboration.
    pub fn complete(&mut self, elaboration: impl Into<String>) -> Result<()> {
        let elaboration = elaboration.into();
        if elaboration.is_empty() {
            return Err(Error::invalid_input(
                "skeleton_point",
                "complete",
                format!("point '{}' cannot complete with an empty elaboration", self.id),
            ));
        }
        self.elaboration = Some(elaboration);
        self.status = PointStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Transition to `Failed`, recording the reason in metadata.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = PointStatus::Failed;
        self.metadata
            .insert("error".to_string(), Value::String(reason.into()));
    }
}

/// Group point indices into dependency levels.
///
/// Level 0 holds points whose dependencies are already satisfied
/// (initially those with none); each later level depends only on earlier
/// ones. Unresolvable references and cycles are errors.
pub fn group_by_dependency_level(points: &[SkeletonPoint]) -> Result<Vec<Vec<usize>>> {
    let index_of: HashMap<&str, usize> = points
        .iter()
        .enumerate()
        .map(|(index, point)| (point.id.as_str(), index))
        .collect();

    for point in points {
        for dep in &point.dependencies {
            if !index_of.contains_key(dep.as_str()) {
                return Err(Error::invalid_input(
                    "sot_planner",
                    "group_by_dependency_level",
                    format!("point '{}' depends on unknown point '{dep}'", point.id),
                ));
            }
        }
    }

    let mut satisfied: HashSet<usize> = HashSet::new();
    let mut levels: Vec<Vec<usize>> = Vec::new();

    while satisfied.len() < points.len() {
        let mut level: Vec<usize> = Vec::new();
        for (index, point) in points.iter().enumerate() {
            if satisfied.contains(&index) {
                continue;
            }
            let ready = point
                .dependencies
                .iter()
                .all(|dep| satisfied.contains(&index_of[dep.as_str()]));
            if ready {
                level.push(index);
            }
        }
        if level.is_empty() {
            return Err(Error::invalid_input(
                "sot_planner",
                "group_by_dependency_level",
                "dependency cycle among skeleton points",
            ));
        }
        satisfied.extend(level.iter().copied());
        levels.push(level);
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, deps: &[&str]) -> SkeletonPoint {
        SkeletonPoint::new(id, id.to_uppercase(), format!("{id} description"))
            .with_dependencies(deps.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn leveling_groups_independent_points() {
        // P1; P2, P3 depend on P1; P4 depends on both.
        let points = vec![
            point("p1", &[]),
            point("p2", &["p1"]),
            point("p3", &["p1"]),
            point("p4", &["p2", "p3"]),
        ];

        let levels = group_by_dependency_level(&points).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![0]);
        assert_eq!(
            {
                let mut mid = levels[1].clone();
                mid.sort_unstable();
                mid
            },
            vec![1, 2]
        );
        assert_eq!(levels[2], vec![3]);
    }

    #[test]
    fn cycles_are_an_error() {
        let points = vec![point("a", &["b"]), point("b", &["a"])];
        let err = group_by_dependency_level(&points).unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let points = vec![point("a", &["ghost"])];
        assert!(group_by_dependency_level(&points).is_err());
    }

    #[test]
    fn completion_requires_a_non_empty_elaboration() {
        let mut point = point("p1", &[]);
        assert!(point.complete("").is_err());
        assert_eq!(point.status, PointStatus::Pending);

        point.complete("the analysis").unwrap();
        assert_eq!(point.status, PointStatus::Completed);
        assert!(point.completed_at.is_some());
    }
}
