//! Nested build lifecycle: run an action against a child build with a
//! guaranteed launcher stop.
//!
//! [`NestedBuild::run`] is the scoped-resource entry point for any build
//! launched as a sub-invocation of another (included builds, buildSrc-style
//! helper builds). The launcher is created lazily per invocation and is
//! always stopped before `run` returns — on the success path, on a `None`
//! result, and on every error path.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::launcher::{BuildLauncher, LauncherFactory, TaskExecutionReport};
use crate::model::{BuildDefinition, BuildInvocationId, TaskPath};

/// Observes nested-build lifecycle transitions.
pub trait BuildStateListener: Send + Sync {
    fn build_started(&self, definition: &BuildDefinition) {
        let _ = definition;
    }

    fn build_finished(&self, definition: &BuildDefinition, success: bool) {
        let _ = (definition, success);
    }
}

/// Transient handle over a single build invocation, passed to the
/// caller's action by [`NestedBuild::run`].
///
/// Carries a single-assignment result slot: [`set_result`] succeeds at
/// most once per invocation, even after the value was consumed via
/// [`take_result`].
///
/// [`set_result`]: BuildController::set_result
/// [`take_result`]: BuildController::take_result
pub struct BuildController {
    definition: Arc<BuildDefinition>,
    launcher: Arc<dyn BuildLauncher>,
    invocation: BuildInvocationId,
    result: OnceLock<serde_json::Value>,
    result_assigned: AtomicBool,
}

impl BuildController {
    pub(crate) fn new(definition: Arc<BuildDefinition>, launcher: Arc<dyn BuildLauncher>) -> Self {
        Self {
            definition,
            launcher,
            invocation: BuildInvocationId::new(),
            result: OnceLock::new(),
            result_assigned: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &BuildDefinition {
        &self.definition
    }

    pub fn invocation(&self) -> &BuildInvocationId {
        &self.invocation
    }

    pub fn launcher(&self) -> &Arc<dyn BuildLauncher> {
        &self.launcher
    }

    /// Schedule `requested` through the build's own dependency graph and
    /// execute the resulting order.
    pub async fn run_tasks(&self, requested: &[TaskPath]) -> BuildTreeResult<TaskExecutionReport> {
        let schedule = self.launcher.task_graph().schedule_for(requested)?;
        self.launcher.execute_tasks(&schedule).await
    }

    /// Assign the invocation result. Errors with
    /// [`BuildTreeError::ResultAlreadySet`] on a second assignment, even
    /// when the first value was already consumed.
    pub fn set_result(&self, value: serde_json::Value) -> BuildTreeResult<()> {
        if self.result_assigned.swap(true, Ordering::SeqCst) {
            return Err(BuildTreeError::ResultAlreadySet {
                invocation: self.invocation.to_string(),
            });
        }
        // The flag guards the slot, so this cannot race another set.
        let _ = self.result.set(value);
        Ok(())
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.get()
    }

    /// Consume the invocation result, leaving the slot empty. The
    /// assignment guard stays in place: a later [`set_result`] still
    /// fails.
    ///
    /// [`set_result`]: BuildController::set_result
    pub fn take_result(&mut self) -> Option<serde_json::Value> {
        self.result.take()
    }
}

/// Associates a [`BuildDefinition`] with a lazily-created launcher.
pub struct NestedBuild {
    definition: Arc<BuildDefinition>,
    factory: Arc<dyn LauncherFactory>,
    listeners: Vec<Arc<dyn BuildStateListener>>,
}

impl NestedBuild {
    pub fn new(definition: Arc<BuildDefinition>, factory: Arc<dyn LauncherFactory>) -> Self {
        Self {
            definition,
            factory,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BuildStateListener>) {
        self.listeners.push(listener);
    }

    pub fn definition(&self) -> &BuildDefinition {
        &self.definition
    }

    /// Run `action` against a controller bound to a fresh launcher.
    ///
    /// The launcher is created once per invocation and stopped exactly
    /// once before this returns, whether the action produced a value,
    /// `None`, or an error. Action errors propagate to the caller after
    /// the stop; a stop failure on the success path becomes the returned
    /// error, while on the failure path the action's error wins and the
    /// stop failure is only logged.
    pub async fn run<R, F, Fut>(&self, action: F) -> BuildTreeResult<Option<R>>
    where
        F: FnOnce(BuildController) -> Fut,
        Fut: Future<Output = BuildTreeResult<Option<R>>>,
    {
        let launcher = self.factory.create(&self.definition).await?;
        debug!(build = %self.definition.build_path(), "nested build launcher created");

        for listener in &self.listeners {
            listener.build_started(&self.definition);
        }

        let controller = BuildController::new(Arc::clone(&self.definition), Arc::clone(&launcher));
        let outcome = action(controller).await;
        let stop_outcome = launcher.stop().await;

        let success = outcome.is_ok() && stop_outcome.is_ok();
        for listener in &self.listeners {
            listener.build_finished(&self.definition, success);
        }

        match outcome {
            Ok(value) => {
                stop_outcome?;
                Ok(value)
            }
            Err(err) => {
                if let Err(stop_err) = stop_outcome {
                    warn!(
                        build = %self.definition.build_path(),
                        error = %stop_err,
                        "launcher stop failed after action error"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::graph::TaskDependencyGraph;
    use crate::model::BuildPath;

    /// Launcher that only counts stops.
    struct CountingLauncher {
        build: BuildPath,
        graph: TaskDependencyGraph,
        stops: Arc<AtomicUsize>,
        fail_stop: bool,
    }

    #[async_trait]
    impl BuildLauncher for CountingLauncher {
        fn build_path(&self) -> &BuildPath {
            &self.build
        }

        fn task_graph(&self) -> &TaskDependencyGraph {
            &self.graph
        }

        async fn execute_tasks(
            &self,
            tasks: &[TaskPath],
        ) -> BuildTreeResult<TaskExecutionReport> {
            Ok(TaskExecutionReport {
                build: self.build.clone(),
                invocation: BuildInvocationId::new(),
                finished_at: chrono::Utc::now(),
                results: tasks
                    .iter()
                    .map(|t| crate::launcher::TaskExecutionResult {
                        task: t.clone(),
                        outcome: crate::launcher::TaskOutcome::Succeeded {
                            artifacts: Vec::new(),
                        },
                        duration_ms: 0,
                    })
                    .collect(),
                duration_ms: 0,
            })
        }

        async fn stop(&self) -> BuildTreeResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(BuildTreeError::LauncherStop {
                    build: self.build.to_string(),
                    reason: "stop exploded".to_string(),
                });
            }
            Ok(())
        }
    }

    struct CountingFactory {
        stops: Arc<AtomicUsize>,
        creations: Arc<AtomicUsize>,
        fail_stop: bool,
    }

    #[async_trait]
    impl LauncherFactory for CountingFactory {
        async fn create(
            &self,
            definition: &BuildDefinition,
        ) -> BuildTreeResult<Arc<dyn BuildLauncher>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingLauncher {
                build: definition.build_path().clone(),
                graph: TaskDependencyGraph::new(),
                stops: Arc::clone(&self.stops),
                fail_stop: self.fail_stop,
            }))
        }
    }

    fn nested(stops: &Arc<AtomicUsize>, creations: &Arc<AtomicUsize>, fail_stop: bool) -> NestedBuild {
        let definition = Arc::new(BuildDefinition::included(
            "child",
            "/tmp/child",
            Default::default(),
            Vec::new(),
        ));
        NestedBuild::new(
            definition,
            Arc::new(CountingFactory {
                stops: Arc::clone(stops),
                creations: Arc::clone(creations),
                fail_stop,
            }),
        )
    }

    #[tokio::test]
    async fn test_run_returns_action_value_and_stops_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, false);

        let value = build
            .run(|_controller| async { Ok(Some("<result>".to_string())) })
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("<result>"));
        assert_eq!(stops.load(Ordering::SeqCst), 1, "stop invoked exactly once");
        assert_eq!(creations.load(Ordering::SeqCst), 1, "launcher created once");
    }

    #[tokio::test]
    async fn test_run_passes_null_result_through_and_stops_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, false);

        let value: Option<String> = build.run(|_controller| async { Ok(None) }).await.unwrap();

        assert!(value.is_none());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_launcher_when_action_fails() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, false);

        let result: BuildTreeResult<Option<()>> = build
            .run(|_controller| async {
                Err(BuildTreeError::TaskExecutionFailed {
                    build: ":child".to_string(),
                    task: ":jar".to_string(),
                    reason: "boom".to_string(),
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(BuildTreeError::TaskExecutionFailed { .. })
        ));
        assert_eq!(stops.load(Ordering::SeqCst), 1, "stop not skipped on failure");
    }

    #[tokio::test]
    async fn test_action_error_wins_over_stop_error() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, true);

        let result: BuildTreeResult<Option<()>> = build
            .run(|_controller| async { Err(BuildTreeError::BuildCancelled) })
            .await;

        assert!(matches!(result, Err(BuildTreeError::BuildCancelled)));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_error_surfaces_on_success_path() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, true);

        let result = build
            .run(|_controller| async { Ok(Some(1u32)) })
            .await;

        assert!(matches!(result, Err(BuildTreeError::LauncherStop { .. })));
    }

    #[tokio::test]
    async fn test_result_slot_is_single_assignment() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, false);

        build
            .run(|controller| async move {
                controller.set_result(serde_json::json!({"ok": true})).unwrap();
                let second = controller.set_result(serde_json::json!({"ok": false}));
                assert!(matches!(
                    second,
                    Err(BuildTreeError::ResultAlreadySet { .. })
                ));
                assert_eq!(controller.result(), Some(&serde_json::json!({"ok": true})));
                Ok(Some(()))
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_take_result_consumes_but_keeps_assignment_guard() {
        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let build = nested(&stops, &creations, false);

        build
            .run(|mut controller| async move {
                controller.set_result(serde_json::json!(42)).unwrap();

                assert_eq!(controller.take_result(), Some(serde_json::json!(42)));
                assert_eq!(controller.result(), None);
                assert_eq!(controller.take_result(), None);

                // Consuming the value does not reopen the slot.
                assert!(matches!(
                    controller.set_result(serde_json::json!(43)),
                    Err(BuildTreeError::ResultAlreadySet { .. })
                ));
                Ok(Some(()))
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_listeners_observe_lifecycle() {
        struct Recorder {
            started: AtomicUsize,
            finished_ok: AtomicUsize,
            finished_err: AtomicUsize,
        }

        impl BuildStateListener for Recorder {
            fn build_started(&self, _definition: &BuildDefinition) {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            fn build_finished(&self, _definition: &BuildDefinition, success: bool) {
                if success {
                    self.finished_ok.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.finished_err.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let stops = Arc::new(AtomicUsize::new(0));
        let creations = Arc::new(AtomicUsize::new(0));
        let mut build = nested(&stops, &creations, false);
        let recorder = Arc::new(Recorder {
            started: AtomicUsize::new(0),
            finished_ok: AtomicUsize::new(0),
            finished_err: AtomicUsize::new(0),
        });
        build.add_listener(Arc::clone(&recorder) as Arc<dyn BuildStateListener>);

        build
            .run(|_c| async { Ok(Some(())) })
            .await
            .unwrap();
        let _: BuildTreeResult<Option<()>> =
            build.run(|_c| async { Err(BuildTreeError::BuildCancelled) }).await;

        assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.finished_ok.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.finished_err.load(Ordering::SeqCst), 1);
    }
}
