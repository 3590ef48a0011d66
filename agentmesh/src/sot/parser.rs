//! Skeleton parsing.
//!
//! Accepts the numbered-list formats an LLM typically produces:
//!
//! ```text
//! 1. [Title]: Description
//! 2. Title: Description Depends on: 1
//! 3. Title
//! ```
//!
//! Dependency entries are either bare numbers or explicit `point_<N>`
//! tokens, and may only reference earlier points.

use std::sync::LazyLock;

use regex::Regex;

use super::plan::SkeletonPoint;

static LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)[.)]\s*(.+)$").expect("static regex"));
static DEPENDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*depends\s+on:\s*(.+)\s*$").expect("static regex"));
static POINT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^point_(\d+)$").expect("static regex"));

/// Parse an LLM skeleton response into points.
///
/// Points are numbered `point_<index>` in parse order (1-based). Lines
/// that do not look like numbered entries are ignored.
#[must_use]
pub fn parse_skeleton(response: &str) -> Vec<SkeletonPoint> {
    let mut points: Vec<SkeletonPoint> = Vec::new();

    for line in response.lines() {
        let Some(captures) = LINE.captures(line) else {
            continue;
        };
        let mut body = captures.get(2).expect("line body").as_str().to_string();

        let mut dependencies: Vec<String> = Vec::new();
        if let Some(dep_match) = DEPENDS.captures(&body) {
            let list = dep_match.get(1).expect("dependency list").as_str();
            dependencies = parse_dependencies(list, points.len());
            let start = dep_match.get(0).expect("dependency suffix").start();
            body.truncate(start);
        }

        let (title, description) = split_title(body.trim());
        if title.is_empty() {
            continue;
        }

        let id = format!("point_{}", points.len() + 1);
        points.push(
            SkeletonPoint::new(id, title, description).with_dependencies(dependencies),
        );
    }
    points
}

/// The fallback three-point skeleton used when parsing yields too few
/// valid entries.
#[must_use]
pub fn default_skeleton(task: &str) -> Vec<SkeletonPoint> {
    vec![
        SkeletonPoint::new(
            "point_1",
            "Analysis",
            format!("Analyze the task and identify its key aspects: {task}"),
        ),
        SkeletonPoint::new(
            "point_2",
            "Approach",
            "Develop an approach that addresses the key aspects",
        )
        .with_dependencies(vec!["point_1".to_string()]),
        SkeletonPoint::new(
            "point_3",
            "Conclusion",
            "Conclude with a synthesis of the findings",
        )
        .with_dependencies(vec!["point_2".to_string()]),
    ]
}

/// Split a line body into title and description.
///
/// `[Title]: Description`, `Title: Description`, and bare `Title` are all
/// accepted; a missing description is left empty.
fn split_title(body: &str) -> (String, String) {
    if let Some(rest) = body.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        let title = rest[..end].trim().to_string();
        let after = rest[end + 1..].trim_start();
        let description = after.strip_prefix(':').unwrap_or(after).trim().to_string();
        return (title, description);
    }
    match body.split_once(':') {
        Some((title, description)) => {
            (title.trim().to_string(), description.trim().to_string())
        }
        None => (body.trim().to_string(), String::new()),
    }
}

/// Parse a dependency list, keeping only references to earlier points.
///
/// `earlier` is the number of points parsed so far; the entry being
/// parsed will become point `earlier + 1`.
fn parse_dependencies(list: &str, earlier: usize) -> Vec<String> {
    let mut dependencies = Vec::new();
    for raw in list.split([',', ';']) {
        let token = raw.trim().trim_end_matches('.');
        if token.is_empty() {
            continue;
        }
        let number = if let Ok(n) = token.parse::<usize>() {
            Some(n)
        } else {
            POINT_TOKEN
                .captures(token)
                .and_then(|c| c.get(1).expect("point number").as_str().parse::<usize>().ok())
        };
        if let Some(n) = number
            && n >= 1
            && n <= earlier
        {
            let id = format!("point_{n}");
            if !dependencies.contains(&id) {
                dependencies.push(id);
            }
        }
    }
    dependencies
}
