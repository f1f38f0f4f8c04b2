//! Cross-build task graph: resolves task references into handles on the
//! owning build's controller.

use std::sync::Arc;

use tracing::debug;

use crate::controllers::{IncludedBuildController, IncludedBuildControllers, TaskStatus};
use crate::error::{BuildTreeError, BuildTreeResult};
use crate::model::TaskReference;

/// Executable handle for a task living in another build.
pub struct TaskHandle {
    reference: TaskReference,
    controller: Arc<IncludedBuildController>,
}

impl TaskHandle {
    pub fn reference(&self) -> &TaskReference {
        &self.reference
    }

    /// Queue the task for execution in its owning build.
    pub fn queue(&self) {
        self.controller.queue_task(self.reference.task.clone());
    }

    /// Suspend until the task reaches a terminal status.
    pub async fn await_completed(&self) -> BuildTreeResult<TaskStatus> {
        self.controller
            .await_task_completed(&self.reference.task)
            .await
    }
}

/// Maps task references scoped to one build onto an executable task in
/// the owning included build. Scheduling itself is delegated to the
/// per-build controllers.
pub struct IncludedBuildTaskGraph {
    controllers: Arc<IncludedBuildControllers>,
}

impl IncludedBuildTaskGraph {
    pub fn new(controllers: Arc<IncludedBuildControllers>) -> Self {
        Self { controllers }
    }

    pub fn controllers(&self) -> &Arc<IncludedBuildControllers> {
        &self.controllers
    }

    /// Resolve `reference` against the composite. Errors when the build
    /// is not a member or its task graph does not know the task.
    pub async fn locate_task(&self, reference: &TaskReference) -> BuildTreeResult<TaskHandle> {
        let controller = self.controllers.controller_for(&reference.build)?;
        if !controller.has_task(&reference.task).await? {
            return Err(BuildTreeError::TaskNotFound {
                build: reference.build.to_string(),
                task: reference.task.to_string(),
            });
        }
        debug!(reference = %reference, "task reference located");
        Ok(TaskHandle {
            reference: reference.clone(),
            controller,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskDependencyGraph;
    use crate::launcher::{InProcessLauncherFactory, LauncherBlueprint, LauncherFactory};
    use crate::lease::WorkerLeaseService;
    use crate::model::{BuildDefinition, BuildPath, StartParameters, TaskPath};
    use crate::registry::{DefaultIncludedBuildFactory, IncludedBuildRegistry};

    fn task(path: &str) -> TaskPath {
        path.parse().unwrap()
    }

    async fn task_graph_with_lib() -> IncludedBuildTaskGraph {
        let launcher_factory = Arc::new(InProcessLauncherFactory::new());
        let definition = BuildDefinition::included(
            "lib",
            "/tmp/lib",
            StartParameters::default(),
            Vec::new(),
        );
        let mut graph = TaskDependencyGraph::new();
        graph.add_task(task(":jar"));
        launcher_factory.register(
            definition.build_path().clone(),
            LauncherBlueprint {
                graph,
                actions: Default::default(),
            },
        );

        let mut registry = IncludedBuildRegistry::new(Arc::new(DefaultIncludedBuildFactory::new(
            launcher_factory as Arc<dyn LauncherFactory>,
        )));
        registry.register(definition).await.unwrap();

        IncludedBuildTaskGraph::new(Arc::new(IncludedBuildControllers::new(
            Arc::new(registry),
            WorkerLeaseService::new(2),
        )))
    }

    #[tokio::test]
    async fn test_locate_queue_and_await() {
        let graph = task_graph_with_lib().await;
        let reference = TaskReference::new(":lib".parse().unwrap(), task(":jar"));

        let handle = graph.locate_task(&reference).await.unwrap();
        handle.queue();

        graph.controllers().populate_task_graphs().await.unwrap();
        graph.controllers().start_task_execution();

        let status = handle.await_completed().await.unwrap();
        assert_eq!(status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_locate_unknown_build_errors() {
        let graph = task_graph_with_lib().await;
        let reference = TaskReference::new(":ghost".parse().unwrap(), task(":jar"));
        let result = graph.locate_task(&reference).await;
        assert!(matches!(result, Err(BuildTreeError::BuildNotFound { .. })));
    }

    #[tokio::test]
    async fn test_locate_unknown_task_errors() {
        let graph = task_graph_with_lib().await;
        let reference = TaskReference::new(":lib".parse().unwrap(), task(":missing"));
        let result = graph.locate_task(&reference).await;
        assert!(matches!(
            result,
            Err(BuildTreeError::TaskNotFound { build, .. }) if build == ":lib"
        ));
    }

    #[tokio::test]
    async fn test_handles_share_one_controller() {
        let graph = task_graph_with_lib().await;
        let reference = TaskReference::new(":lib".parse().unwrap(), task(":jar"));
        let a = graph.locate_task(&reference).await.unwrap();
        let b = graph.locate_task(&reference).await.unwrap();
        a.queue();
        b.queue();

        let lib: BuildPath = ":lib".parse().unwrap();
        let controller = graph.controllers().controller_for(&lib).unwrap();
        assert_eq!(controller.queued_tasks(), vec![task(":jar")]);
    }
}
