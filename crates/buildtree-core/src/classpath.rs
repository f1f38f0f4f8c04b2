//! Script classpath initialization from included-build outputs.
//!
//! During script compilation the root build may need artifacts produced
//! by tasks of included builds (plugin jars, convention libraries). The
//! initializer queues the producing tasks, blocks on their completion and
//! collects the reported artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::controllers::TaskStatus;
use crate::error::{BuildTreeError, BuildTreeResult};
use crate::model::{BuildPath, TaskReference};
use crate::task_graph::IncludedBuildTaskGraph;

/// Pulls classpath contributions out of included builds' task graphs.
pub struct ScriptClassPathInitializer {
    task_graph: Arc<IncludedBuildTaskGraph>,
    /// The build whose scripts are being compiled; references addressed
    /// at it are not cross-build work and are ignored here.
    current_build: BuildPath,
}

impl ScriptClassPathInitializer {
    pub fn new(task_graph: Arc<IncludedBuildTaskGraph>, current_build: BuildPath) -> Self {
        Self {
            task_graph,
            current_build,
        }
    }

    /// Execute the producing tasks behind `references` and return the
    /// artifacts they reported, in reference order.
    ///
    /// Suspends until every producing build has finished the relevant
    /// work. A failed or skipped producer is a fatal build failure.
    pub async fn execute(&self, references: &[TaskReference]) -> BuildTreeResult<Vec<PathBuf>> {
        let mut handles = Vec::new();
        for reference in references {
            if reference.build == self.current_build {
                debug!(reference = %reference, "skipping current-build reference");
                continue;
            }
            let handle = self.task_graph.locate_task(reference).await?;
            handle.queue();
            handles.push(handle);
        }

        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let controllers = self.task_graph.controllers();
        controllers.populate_task_graphs().await?;
        controllers.start_task_execution();

        let mut classpath = Vec::new();
        for handle in &handles {
            let reference = handle.reference();
            let status = handle.await_completed().await?;
            match status {
                TaskStatus::Succeeded => {}
                TaskStatus::Failed | TaskStatus::Skipped => {
                    return Err(BuildTreeError::TaskExecutionFailed {
                        build: reference.build.to_string(),
                        task: reference.task.to_string(),
                        reason: format!("classpath producer finished as {status:?}"),
                    });
                }
                // Terminal statuses only, per await_task_completed.
                other => {
                    return Err(BuildTreeError::TaskExecutionFailed {
                        build: reference.build.to_string(),
                        task: reference.task.to_string(),
                        reason: format!("unexpected status {other:?}"),
                    });
                }
            }

            let controller = controllers.controller_for(&reference.build)?;
            if let Some(report) = controller.report() {
                if let Some(result) = report.result_for(&reference.task) {
                    if let crate::launcher::TaskOutcome::Succeeded { artifacts } = &result.outcome {
                        classpath.extend(artifacts.iter().cloned());
                    }
                }
            }
        }

        info!(
            entries = classpath.len(),
            producers = handles.len(),
            "script classpath initialized"
        );
        Ok(classpath)
    }
}
