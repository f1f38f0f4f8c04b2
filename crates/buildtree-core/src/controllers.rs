//! Per-build execution controllers.
//!
//! One [`IncludedBuildController`] per included build: it owns the
//! scheduling and execution of that build's task graph and exposes
//! completion to the root build. [`IncludedBuildControllers`] is the
//! tree-scoped collection driving the bulk lifecycle
//! (`populate_task_graphs` → `start_task_execution` → `await_completion`).
//!
//! Controllers run concurrently on tokio worker tasks, gated by the
//! [`WorkerLeaseService`]; the root build suspends only when it awaits a
//! specific task or the whole set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::launcher::{TaskExecutionReport, TaskExecutionResult, TaskOutcome};
use crate::lease::WorkerLeaseService;
use crate::model::{BuildInvocationId, BuildPath, TaskPath};
use crate::registry::{IncludedBuildRegistry, IncludedBuildState};

/// Lifecycle of one task within a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Not run: an earlier task failed or the build was cancelled.
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Tree-wide cancellation flag. Cloned into every controller; once
/// triggered, work that has not started is skipped.
#[derive(Clone)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Default)]
struct ControllerInner {
    /// Tasks requested against this build, deduplicated, request order.
    queued: Vec<TaskPath>,
    /// Full execution schedule after graph population.
    schedule: Vec<TaskPath>,
    statuses: HashMap<TaskPath, TaskStatus>,
    /// Single-assignment: published once when execution finishes.
    report: Option<TaskExecutionReport>,
}

/// Owns the execution of one included build's task graph.
pub struct IncludedBuildController {
    build: Arc<IncludedBuildState>,
    leases: WorkerLeaseService,
    cancellation: CancellationSignal,
    inner: Mutex<ControllerInner>,
    /// Bumped on every status change and on completion; awaiters watch it.
    progress: watch::Sender<u64>,
    launcher: tokio::sync::Mutex<Option<Arc<dyn crate::launcher::BuildLauncher>>>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IncludedBuildController {
    pub fn new(
        build: Arc<IncludedBuildState>,
        leases: WorkerLeaseService,
        cancellation: CancellationSignal,
    ) -> Self {
        let (progress, _rx) = watch::channel(0);
        Self {
            build,
            leases,
            cancellation,
            inner: Mutex::new(ControllerInner::default()),
            progress,
            launcher: tokio::sync::Mutex::new(None),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn build_path(&self) -> &BuildPath {
        self.build.build_path()
    }

    /// Queue a task for execution in this build. Idempotent.
    pub fn queue_task(&self, task: TaskPath) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.queued.contains(&task) {
            debug!(build = %self.build_path(), task = %task, "task queued");
            inner.statuses.insert(task.clone(), TaskStatus::Queued);
            inner.queued.push(task);
        }
    }

    pub fn queued_tasks(&self) -> Vec<TaskPath> {
        self.inner.lock().unwrap().queued.clone()
    }

    /// `true` once execution has been started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The launcher for this controller's run, created on first use.
    async fn launcher(&self) -> BuildTreeResult<Arc<dyn crate::launcher::BuildLauncher>> {
        let mut guard = self.launcher.lock().await;
        if let Some(launcher) = guard.as_ref() {
            return Ok(Arc::clone(launcher));
        }
        let launcher = self.build.create_launcher().await?;
        *guard = Some(Arc::clone(&launcher));
        Ok(launcher)
    }

    /// `true` when the build's task graph knows `task`.
    pub async fn has_task(&self, task: &TaskPath) -> BuildTreeResult<bool> {
        let launcher = self.launcher().await?;
        Ok(launcher.task_graph().contains(task))
    }

    /// Expand queued tasks to the full execution schedule via the build's
    /// dependency graph. Surfaces cycles and unknown tasks.
    pub async fn populate_task_graph(&self) -> BuildTreeResult<()> {
        let queued = self.queued_tasks();
        if queued.is_empty() {
            return Ok(());
        }
        let launcher = self.launcher().await?;
        let schedule = launcher
            .task_graph()
            .schedule_for(&queued)
            .map_err(|e| self.with_build_context(e))?;

        let mut inner = self.inner.lock().unwrap();
        for task in &schedule {
            inner
                .statuses
                .entry(task.clone())
                .or_insert(TaskStatus::Queued);
        }
        debug!(
            build = %self.build_path(),
            requested = queued.len(),
            scheduled = schedule.len(),
            "task graph populated"
        );
        inner.schedule = schedule;
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Spawn this build's execution on a tokio worker task. Idempotent —
    /// only the first call starts anything.
    pub fn start_execution(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move { controller.execute().await });
        *self.handle.lock().unwrap() = Some(handle);
    }

    async fn execute(&self) {
        // Populate is idempotent; covers callers that skip the bulk step.
        if let Err(e) = self.populate_task_graph().await {
            self.finish_all_failed(&e.to_string());
            return;
        }

        let schedule = self.inner.lock().unwrap().schedule.clone();
        if schedule.is_empty() {
            self.publish_report(self.make_report(Vec::new(), BuildInvocationId::new(), 0));
            return;
        }

        if self.cancellation.is_cancelled() {
            self.finish_skipped(&schedule);
            return;
        }

        let _lease = match self.leases.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                self.finish_all_failed(&e.to_string());
                return;
            }
        };

        let launcher = match self.launcher().await {
            Ok(launcher) => launcher,
            Err(e) => {
                self.finish_all_failed(&e.to_string());
                return;
            }
        };

        let continue_on_failure = self
            .build
            .definition()
            .start_parameters()
            .continue_on_failure;

        info!(build = %self.build_path(), tasks = schedule.len(), "task execution started");
        let start = Instant::now();
        let mut invocation: Option<BuildInvocationId> = None;
        let mut results: Vec<TaskExecutionResult> = Vec::with_capacity(schedule.len());
        let mut failed = false;

        for task in &schedule {
            if (failed && !continue_on_failure) || self.cancellation.is_cancelled() {
                self.set_status(task, TaskStatus::Skipped);
                results.push(TaskExecutionResult {
                    task: task.clone(),
                    outcome: TaskOutcome::Skipped,
                    duration_ms: 0,
                });
                continue;
            }

            self.set_status(task, TaskStatus::Running);
            match launcher.execute_tasks(std::slice::from_ref(task)).await {
                Ok(mut report) => {
                    invocation.get_or_insert(report.invocation.clone());
                    let result = report.results.pop().unwrap_or(TaskExecutionResult {
                        task: task.clone(),
                        outcome: TaskOutcome::Failed {
                            message: "launcher returned no result".to_string(),
                        },
                        duration_ms: 0,
                    });
                    if result.passed() {
                        self.set_status(task, TaskStatus::Succeeded);
                    } else {
                        failed = true;
                        self.set_status(task, TaskStatus::Failed);
                    }
                    results.push(result);
                }
                Err(e) => {
                    failed = true;
                    self.set_status(task, TaskStatus::Failed);
                    results.push(TaskExecutionResult {
                        task: task.clone(),
                        outcome: TaskOutcome::Failed {
                            message: e.to_string(),
                        },
                        duration_ms: 0,
                    });
                }
            }
        }

        if let Err(e) = launcher.stop().await {
            warn!(build = %self.build_path(), error = %e, "launcher stop failed");
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let invocation = invocation.unwrap_or_else(BuildInvocationId::new);
        let report = self.make_report(results, invocation, duration_ms);
        info!(
            build = %self.build_path(),
            success = report.success(),
            duration_ms,
            "task execution finished"
        );
        self.publish_report(report);
    }

    /// Suspend until `task` reaches a terminal status. This is the root
    /// build's suspension point when it needs another build's output.
    pub async fn await_task_completed(&self, task: &TaskPath) -> BuildTreeResult<TaskStatus> {
        let mut rx = self.progress.subscribe();
        loop {
            {
                let inner = self.inner.lock().unwrap();
                match inner.statuses.get(task) {
                    None => {
                        return Err(BuildTreeError::TaskNotQueued {
                            build: self.build_path().to_string(),
                            task: task.to_string(),
                        })
                    }
                    Some(status) if status.is_terminal() => return Ok(*status),
                    Some(_) => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(BuildTreeError::BuildCancelled);
            }
        }
    }

    /// Suspend until this build's execution finishes; returns the report.
    pub async fn await_completion(&self) -> BuildTreeResult<TaskExecutionReport> {
        let mut rx = self.progress.subscribe();
        loop {
            if let Some(report) = self.report() {
                return Ok(report);
            }
            if rx.changed().await.is_err() {
                return Err(BuildTreeError::BuildCancelled);
            }
        }
    }

    /// The published report, once execution has finished.
    pub fn report(&self) -> Option<TaskExecutionReport> {
        self.inner.lock().unwrap().report.clone()
    }

    pub fn task_status(&self, task: &TaskPath) -> Option<TaskStatus> {
        self.inner.lock().unwrap().statuses.get(task).copied()
    }

    fn set_status(&self, task: &TaskPath, status: TaskStatus) {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .insert(task.clone(), status);
        self.notify();
    }

    fn notify(&self) {
        self.progress.send_modify(|v| *v += 1);
    }

    fn make_report(
        &self,
        results: Vec<TaskExecutionResult>,
        invocation: BuildInvocationId,
        duration_ms: u64,
    ) -> TaskExecutionReport {
        TaskExecutionReport {
            build: self.build_path().clone(),
            invocation,
            results,
            duration_ms,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Publish the report. Single-assignment: a second publication is a
    /// bug in the controller and is dropped with a warning.
    fn publish_report(&self, report: TaskExecutionReport) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.report.is_some() {
                warn!(build = %self.build_path(), "execution report already published");
                return;
            }
            inner.report = Some(report);
        }
        self.notify();
    }

    /// Mark every scheduled task skipped and publish; used when the build
    /// tree was cancelled before this build started.
    fn finish_skipped(&self, schedule: &[TaskPath]) {
        let results = schedule
            .iter()
            .map(|task| {
                self.set_status(task, TaskStatus::Skipped);
                TaskExecutionResult {
                    task: task.clone(),
                    outcome: TaskOutcome::Skipped,
                    duration_ms: 0,
                }
            })
            .collect();
        info!(build = %self.build_path(), "skipping cancelled build");
        self.publish_report(self.make_report(results, BuildInvocationId::new(), 0));
    }

    /// Mark every non-terminal task failed with `message` and publish;
    /// used for launcher-level failures.
    fn finish_all_failed(&self, message: &str) {
        let schedule: Vec<TaskPath> = {
            let inner = self.inner.lock().unwrap();
            if inner.schedule.is_empty() {
                inner.queued.clone()
            } else {
                inner.schedule.clone()
            }
        };
        let results = schedule
            .iter()
            .map(|task| {
                self.set_status(task, TaskStatus::Failed);
                TaskExecutionResult {
                    task: task.clone(),
                    outcome: TaskOutcome::Failed {
                        message: message.to_string(),
                    },
                    duration_ms: 0,
                }
            })
            .collect();
        warn!(build = %self.build_path(), error = %message, "build execution failed");
        self.publish_report(self.make_report(results, BuildInvocationId::new(), 0));
    }

    fn with_build_context(&self, err: BuildTreeError) -> BuildTreeError {
        match err {
            BuildTreeError::TaskNotFound { task, .. } => BuildTreeError::TaskNotFound {
                build: self.build_path().to_string(),
                task,
            },
            other => other,
        }
    }
}

impl Drop for IncludedBuildController {
    /// A launcher created lazily for graph population must not leak when
    /// the controller is discarded without ever executing. Started
    /// controllers stop their launcher inside `execute`.
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            return;
        }
        if let Some(launcher) = self.launcher.get_mut().take() {
            let build = self.build_path().clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = launcher.stop().await {
                        warn!(build = %build, error = %e, "launcher stop failed on drop");
                    }
                });
            } else {
                warn!(build = %build, "controller dropped outside a runtime; launcher not stopped");
            }
        }
    }
}

/// Tree-scoped collection: one controller per included build, created on
/// first access from the registry.
pub struct IncludedBuildControllers {
    registry: Arc<IncludedBuildRegistry>,
    leases: WorkerLeaseService,
    cancellation: CancellationSignal,
    /// Creation order preserved; the composite has few members.
    controllers: Mutex<Vec<(BuildPath, Arc<IncludedBuildController>)>>,
}

impl IncludedBuildControllers {
    pub fn new(registry: Arc<IncludedBuildRegistry>, leases: WorkerLeaseService) -> Self {
        Self {
            registry,
            leases,
            cancellation: CancellationSignal::new(),
            controllers: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<IncludedBuildRegistry> {
        &self.registry
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Signal tree-wide cancellation: builds that have not started will
    /// skip their work.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// The controller owning `build`, created on first access.
    pub fn controller_for(
        &self,
        build: &BuildPath,
    ) -> BuildTreeResult<Arc<IncludedBuildController>> {
        let mut controllers = self.controllers.lock().unwrap();
        if let Some((_, controller)) = controllers.iter().find(|(path, _)| path == build) {
            return Ok(Arc::clone(controller));
        }
        let state = self.registry.build(build)?;
        let controller = Arc::new(IncludedBuildController::new(
            state,
            self.leases.clone(),
            self.cancellation.clone(),
        ));
        controllers.push((build.clone(), Arc::clone(&controller)));
        Ok(controller)
    }

    fn snapshot(&self) -> Vec<Arc<IncludedBuildController>> {
        self.controllers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| Arc::clone(c))
            .collect()
    }

    /// Expand every controller's queued tasks through its build's
    /// dependency graph.
    pub async fn populate_task_graphs(&self) -> BuildTreeResult<()> {
        for controller in self.snapshot() {
            controller.populate_task_graph().await?;
        }
        Ok(())
    }

    /// Start execution of every populated controller. Builds run
    /// concurrently, bounded by worker leases.
    pub fn start_task_execution(&self) {
        for controller in self.snapshot() {
            controller.start_execution();
        }
    }

    /// Suspend until every started build finishes. Returns the reports in
    /// controller-creation order; failed builds become
    /// [`BuildTreeError::IncludedBuildsFailed`], a cancelled tree becomes
    /// [`BuildTreeError::BuildCancelled`] — in both cases reports remain
    /// readable via [`IncludedBuildController::report`].
    pub async fn await_completion(&self) -> BuildTreeResult<Vec<TaskExecutionReport>> {
        let mut reports = Vec::new();
        let mut failed_builds = Vec::new();

        for controller in self.snapshot() {
            if !controller.is_started() {
                continue;
            }
            let report = controller.await_completion().await?;
            if !report.success() {
                failed_builds.push(report.build.to_string());
            }
            reports.push(report);
        }

        if self.cancellation.is_cancelled() {
            return Err(BuildTreeError::BuildCancelled);
        }
        if !failed_builds.is_empty() {
            return Err(BuildTreeError::IncludedBuildsFailed {
                builds: failed_builds,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;
    use crate::graph::TaskDependencyGraph;
    use crate::launcher::{InProcessLauncherFactory, LauncherBlueprint, TaskAction};
    use crate::model::{BuildDefinition, StartParameters};
    use crate::registry::DefaultIncludedBuildFactory;

    fn task(path: &str) -> TaskPath {
        path.parse().unwrap()
    }

    fn lib_graph() -> TaskDependencyGraph {
        let mut g = TaskDependencyGraph::new();
        g.add_task(task(":compile"));
        g.add_task(task(":jar"));
        g.add_dependency(&task(":jar"), &task(":compile")).unwrap();
        g
    }

    async fn controllers_with(
        builds: Vec<(&str, TaskDependencyGraph, StdHashMap<TaskPath, TaskAction>)>,
        max_workers: usize,
    ) -> Arc<IncludedBuildControllers> {
        let launcher_factory = Arc::new(InProcessLauncherFactory::new());
        let mut registry = IncludedBuildRegistry::new(Arc::new(DefaultIncludedBuildFactory::new(
            Arc::clone(&launcher_factory) as Arc<dyn crate::launcher::LauncherFactory>,
        )));

        for (name, graph, actions) in builds {
            let definition = BuildDefinition::included(
                name,
                format!("/tmp/{name}"),
                StartParameters::default(),
                Vec::new(),
            );
            launcher_factory.register(
                definition.build_path().clone(),
                LauncherBlueprint { graph, actions },
            );
            registry.register(definition).await.unwrap();
        }

        Arc::new(IncludedBuildControllers::new(
            Arc::new(registry),
            WorkerLeaseService::new(max_workers),
        ))
    }

    #[tokio::test]
    async fn test_full_lifecycle_executes_dependencies_in_order() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 2).await;

        let lib: BuildPath = ":lib".parse().unwrap();
        let controller = controllers.controller_for(&lib).unwrap();
        controller.queue_task(task(":jar"));

        controllers.populate_task_graphs().await.unwrap();
        controllers.start_task_execution();
        let reports = controllers.await_completion().await.unwrap();

        assert_eq!(reports.len(), 1);
        let order: Vec<&TaskPath> = reports[0].results.iter().map(|r| &r.task).collect();
        assert_eq!(order, vec![&task(":compile"), &task(":jar")]);
        assert_eq!(
            controller.task_status(&task(":compile")),
            Some(TaskStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_failure_skips_downstream_tasks() {
        let mut actions: StdHashMap<TaskPath, TaskAction> = StdHashMap::new();
        actions.insert(
            task(":compile"),
            Arc::new(|_: &TaskPath| TaskOutcome::Failed {
                message: "does not compile".to_string(),
            }),
        );
        let controllers = controllers_with(vec![("lib", lib_graph(), actions)], 2).await;

        let lib: BuildPath = ":lib".parse().unwrap();
        let controller = controllers.controller_for(&lib).unwrap();
        controller.queue_task(task(":jar"));

        controllers.populate_task_graphs().await.unwrap();
        controllers.start_task_execution();
        let result = controllers.await_completion().await;

        assert!(matches!(
            result,
            Err(BuildTreeError::IncludedBuildsFailed { .. })
        ));
        assert_eq!(
            controller.task_status(&task(":compile")),
            Some(TaskStatus::Failed)
        );
        assert_eq!(
            controller.task_status(&task(":jar")),
            Some(TaskStatus::Skipped)
        );
        // The report stays readable after the aggregate failure.
        assert!(controller.report().is_some());
    }

    #[tokio::test]
    async fn test_await_task_completed_suspends_until_terminal() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 1).await;
        let controller = controllers
            .controller_for(&":lib".parse().unwrap())
            .unwrap();
        controller.queue_task(task(":jar"));
        controllers.populate_task_graphs().await.unwrap();

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.await_task_completed(&task(":jar")).await })
        };

        controllers.start_task_execution();
        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_awaiting_unqueued_task_errors() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 1).await;
        let controller = controllers
            .controller_for(&":lib".parse().unwrap())
            .unwrap();
        let result = controller.await_task_completed(&task(":jar")).await;
        assert!(matches!(result, Err(BuildTreeError::TaskNotQueued { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_builds() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 1).await;
        let controller = controllers
            .controller_for(&":lib".parse().unwrap())
            .unwrap();
        controller.queue_task(task(":jar"));
        controllers.populate_task_graphs().await.unwrap();

        controllers.cancel();
        controllers.start_task_execution();
        let result = controllers.await_completion().await;

        assert!(matches!(result, Err(BuildTreeError::BuildCancelled)));
        assert_eq!(
            controller.task_status(&task(":jar")),
            Some(TaskStatus::Skipped)
        );
        // The skip report was still published before cancellation surfaced.
        assert!(controller.report().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_leases_bound_concurrency() {
        use std::sync::atomic::AtomicUsize;

        // Both builds record the number of concurrently running actions.
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut builds = Vec::new();
        for name in ["a", "b", "c"] {
            let mut graph = TaskDependencyGraph::new();
            graph.add_task(task(":work"));
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let mut actions: StdHashMap<TaskPath, TaskAction> = StdHashMap::new();
            actions.insert(
                task(":work"),
                Arc::new(move |_: &TaskPath| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    TaskOutcome::Succeeded {
                        artifacts: Vec::new(),
                    }
                }),
            );
            builds.push((name, graph, actions));
        }

        let controllers = controllers_with(builds, 1).await;
        for name in ["a", "b", "c"] {
            let path: BuildPath = format!(":{name}").parse().unwrap();
            let controller = controllers.controller_for(&path).unwrap();
            controller.queue_task(task(":work"));
        }

        controllers.populate_task_graphs().await.unwrap();
        controllers.start_task_execution();
        controllers.await_completion().await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1, "single lease, no overlap");
    }

    #[tokio::test]
    async fn test_dropped_unstarted_controller_stops_cached_launcher() {
        use std::sync::atomic::AtomicUsize;

        use async_trait::async_trait;

        use crate::launcher::BuildLauncher;

        struct TrackedLauncher {
            build: BuildPath,
            graph: TaskDependencyGraph,
            stops: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl BuildLauncher for TrackedLauncher {
            fn build_path(&self) -> &BuildPath {
                &self.build
            }

            fn task_graph(&self) -> &TaskDependencyGraph {
                &self.graph
            }

            async fn execute_tasks(
                &self,
                _tasks: &[TaskPath],
            ) -> BuildTreeResult<TaskExecutionReport> {
                Ok(TaskExecutionReport {
                    build: self.build.clone(),
                    invocation: BuildInvocationId::new(),
                    results: Vec::new(),
                    duration_ms: 0,
                    finished_at: chrono::Utc::now(),
                })
            }

            async fn stop(&self) -> BuildTreeResult<()> {
                self.stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        struct TrackedFactory {
            stops: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl crate::launcher::LauncherFactory for TrackedFactory {
            async fn create(
                &self,
                definition: &BuildDefinition,
            ) -> BuildTreeResult<Arc<dyn BuildLauncher>> {
                let mut graph = TaskDependencyGraph::new();
                graph.add_task(task(":jar"));
                Ok(Arc::new(TrackedLauncher {
                    build: definition.build_path().clone(),
                    graph,
                    stops: Arc::clone(&self.stops),
                }))
            }
        }

        let stops = Arc::new(AtomicUsize::new(0));
        let mut registry = IncludedBuildRegistry::new(Arc::new(DefaultIncludedBuildFactory::new(
            Arc::new(TrackedFactory {
                stops: Arc::clone(&stops),
            }) as Arc<dyn crate::launcher::LauncherFactory>,
        )));
        registry
            .register(BuildDefinition::included(
                "lib",
                "/tmp/lib",
                StartParameters::default(),
                Vec::new(),
            ))
            .await
            .unwrap();
        let controllers =
            IncludedBuildControllers::new(Arc::new(registry), WorkerLeaseService::new(1));

        let controller = controllers
            .controller_for(&":lib".parse().unwrap())
            .unwrap();
        // has_task caches a launcher without ever starting execution.
        assert!(controller.has_task(&task(":jar")).await.unwrap());
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        drop(controller);
        drop(controllers);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1, "cached launcher stopped");
    }

    #[tokio::test]
    async fn test_controller_for_unknown_build_errors() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 1).await;
        let result = controllers.controller_for(&":ghost".parse().unwrap());
        assert!(matches!(result, Err(BuildTreeError::BuildNotFound { .. })));
    }

    #[tokio::test]
    async fn test_start_execution_is_idempotent() {
        let controllers =
            controllers_with(vec![("lib", lib_graph(), StdHashMap::new())], 1).await;
        let controller = controllers
            .controller_for(&":lib".parse().unwrap())
            .unwrap();
        controller.queue_task(task(":compile"));
        controller.populate_task_graph().await.unwrap();

        controller.start_execution();
        controller.start_execution();
        let report = controller.await_completion().await.unwrap();
        assert_eq!(report.results.len(), 1);
    }
}
