//! Build launcher seam and task execution reports.
//!
//! [`BuildLauncher`] is the backend a controller drives to actually run
//! tasks inside one build. Inject [`InProcessLauncher`] with closure
//! actions for tests and the CLI; a daemon-backed implementation would
//! satisfy the same contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::graph::TaskDependencyGraph;
use crate::model::{BuildDefinition, BuildInvocationId, BuildPath, TaskPath};

/// Terminal outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TaskOutcome {
    /// Task ran to completion; `artifacts` are the files it produced.
    Succeeded { artifacts: Vec<PathBuf> },
    Failed { message: String },
    /// Not run: an earlier task failed or the build was cancelled.
    Skipped,
}

/// Result of a single task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub task: TaskPath,
    pub outcome: TaskOutcome,
    pub duration_ms: u64,
}

impl TaskExecutionResult {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }
}

/// Everything one launcher invocation produced, consumed by the root
/// build once the owning controller completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionReport {
    pub build: BuildPath,
    pub invocation: BuildInvocationId,
    pub results: Vec<TaskExecutionResult>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskExecutionReport {
    /// `true` when no task failed (skipped tasks do not count as failures
    /// here; the skip cause is reported separately).
    pub fn success(&self) -> bool {
        !self
            .results
            .iter()
            .any(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
    }

    /// Artifacts produced across all tasks, in task execution order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                TaskOutcome::Succeeded { artifacts } => Some(artifacts.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Tasks that failed, with their messages.
    pub fn failures(&self) -> Vec<(&TaskPath, &str)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                TaskOutcome::Failed { message } => Some((&r.task, message.as_str())),
                _ => None,
            })
            .collect()
    }

    /// The result recorded for one task, if it was part of this invocation.
    pub fn result_for(&self, task: &TaskPath) -> Option<&TaskExecutionResult> {
        self.results.iter().find(|r| &r.task == task)
    }
}

/// Backend that runs tasks inside one build.
///
/// A launcher covers a single build invocation: once stopped it must not
/// be used again. `stop` is single-shot — a second call is a
/// [`BuildTreeError::LauncherStopped`] error.
#[async_trait]
pub trait BuildLauncher: Send + Sync {
    /// The build this launcher executes.
    fn build_path(&self) -> &BuildPath;

    /// The build's own task dependency graph.
    fn task_graph(&self) -> &TaskDependencyGraph;

    /// Run `tasks` in the given order and report per-task outcomes.
    async fn execute_tasks(&self, tasks: &[TaskPath]) -> BuildTreeResult<TaskExecutionReport>;

    /// Release the launcher's resources. Single-shot.
    async fn stop(&self) -> BuildTreeResult<()>;
}

/// Creates launchers from build definitions.
#[async_trait]
pub trait LauncherFactory: Send + Sync {
    async fn create(&self, definition: &BuildDefinition)
        -> BuildTreeResult<Arc<dyn BuildLauncher>>;
}

/// Closure invoked when an [`InProcessLauncher`] executes a task.
pub type TaskAction = Arc<dyn Fn(&TaskPath) -> TaskOutcome + Send + Sync>;

/// In-process launcher: task actions are injected closures, scheduled
/// through the build's [`TaskDependencyGraph`].
///
/// Tasks without a registered action succeed with no artifacts, so graphs
/// can be exercised without wiring an action per task.
pub struct InProcessLauncher {
    build: BuildPath,
    invocation: BuildInvocationId,
    graph: TaskDependencyGraph,
    actions: HashMap<TaskPath, TaskAction>,
    stopped: AtomicBool,
}

impl InProcessLauncher {
    pub fn new(build: BuildPath, graph: TaskDependencyGraph) -> Self {
        Self {
            build,
            invocation: BuildInvocationId::new(),
            graph,
            actions: HashMap::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Attach an action to run when `task` executes.
    pub fn with_action(mut self, task: TaskPath, action: TaskAction) -> Self {
        self.actions.insert(task, action);
        self
    }

    pub fn invocation(&self) -> &BuildInvocationId {
        &self.invocation
    }

    fn ensure_running(&self) -> BuildTreeResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BuildTreeError::LauncherStopped {
                build: self.build.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BuildLauncher for InProcessLauncher {
    fn build_path(&self) -> &BuildPath {
        &self.build
    }

    fn task_graph(&self) -> &TaskDependencyGraph {
        &self.graph
    }

    async fn execute_tasks(&self, tasks: &[TaskPath]) -> BuildTreeResult<TaskExecutionReport> {
        self.ensure_running()?;
        let start = Instant::now();
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            if !self.graph.contains(task) {
                return Err(BuildTreeError::TaskNotFound {
                    build: self.build.to_string(),
                    task: task.to_string(),
                });
            }
            let task_start = Instant::now();
            let outcome = match self.actions.get(task) {
                Some(action) => action(task),
                None => TaskOutcome::Succeeded {
                    artifacts: Vec::new(),
                },
            };
            debug!(build = %self.build, task = %task, ok = %matches!(outcome, TaskOutcome::Succeeded { .. }), "task executed");
            results.push(TaskExecutionResult {
                task: task.clone(),
                outcome,
                duration_ms: task_start.elapsed().as_millis() as u64,
            });
        }

        Ok(TaskExecutionReport {
            build: self.build.clone(),
            invocation: self.invocation.clone(),
            results,
            duration_ms: start.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        })
    }

    async fn stop(&self) -> BuildTreeResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(BuildTreeError::LauncherStopped {
                build: self.build.to_string(),
            });
        }
        debug!(build = %self.build, invocation = %self.invocation.short(), "launcher stopped");
        Ok(())
    }
}

/// Blueprint for constructing fresh [`InProcessLauncher`]s for one build.
#[derive(Clone, Default)]
pub struct LauncherBlueprint {
    pub graph: TaskDependencyGraph,
    pub actions: HashMap<TaskPath, TaskAction>,
}

/// [`LauncherFactory`] backed by per-build blueprints. Every `create`
/// call yields a fresh launcher with its own invocation id.
#[derive(Default)]
pub struct InProcessLauncherFactory {
    blueprints: std::sync::Mutex<HashMap<BuildPath, LauncherBlueprint>>,
}

impl InProcessLauncherFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the blueprint used for launchers of `build`.
    pub fn register(&self, build: BuildPath, blueprint: LauncherBlueprint) {
        self.blueprints.lock().unwrap().insert(build, blueprint);
    }
}

#[async_trait]
impl LauncherFactory for InProcessLauncherFactory {
    async fn create(
        &self,
        definition: &BuildDefinition,
    ) -> BuildTreeResult<Arc<dyn BuildLauncher>> {
        let blueprint = self
            .blueprints
            .lock()
            .unwrap()
            .get(definition.build_path())
            .cloned()
            .ok_or_else(|| BuildTreeError::LauncherCreation {
                build: definition.build_path().to_string(),
                reason: "no launcher blueprint registered".to_string(),
            })?;

        let mut launcher =
            InProcessLauncher::new(definition.build_path().clone(), blueprint.graph);
        for (task, action) in blueprint.actions {
            launcher = launcher.with_action(task, action);
        }
        Ok(Arc::new(launcher))
    }
}
