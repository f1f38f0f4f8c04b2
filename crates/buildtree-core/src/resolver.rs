//! Task reference resolution: raw task path strings from the build
//! invocation layer, resolved against either the root build or an
//! included build.

use std::sync::Arc;

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::model::{TaskPath, TaskReference};
use crate::registry::IncludedBuildRegistry;

/// Where a raw task path string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTask {
    /// A task of the composite root build itself.
    Root(TaskPath),
    /// A task owned by an included build.
    Included(TaskReference),
}

/// Resolves raw task path strings against the composite.
///
/// When the first path segment names a registered included build, the
/// remainder is a task path inside that build; otherwise the whole
/// string addresses the root build.
pub struct TaskReferenceResolver {
    registry: Arc<IncludedBuildRegistry>,
}

impl TaskReferenceResolver {
    pub fn new(registry: Arc<IncludedBuildRegistry>) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, raw: &str) -> BuildTreeResult<ResolvedTask> {
        if raw.is_empty() || raw == ":" {
            return Err(BuildTreeError::InvalidPath {
                raw: raw.to_string(),
                reason: "task path needs at least one segment".to_string(),
            });
        }

        // Accept both `lib:jar` and `:lib:jar`.
        let normalized = if raw.starts_with(':') {
            raw.to_string()
        } else {
            format!(":{raw}")
        };

        let first_segment = normalized[1..]
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();

        if let Some(build) = self.registry.find_build_named(&first_segment) {
            let rest = &normalized[1 + first_segment.len()..];
            if rest.is_empty() {
                return Err(BuildTreeError::InvalidPath {
                    raw: raw.to_string(),
                    reason: format!("'{first_segment}' names a build, not a task"),
                });
            }
            let task: TaskPath = rest.parse()?;
            return Ok(ResolvedTask::Included(TaskReference::new(
                build.build_path().clone(),
                task,
            )));
        }

        Ok(ResolvedTask::Root(normalized.parse()?))
    }
}
