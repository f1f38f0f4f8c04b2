//! Phased tooling actions.
//!
//! A tooling client can attach work to the build lifecycle phases
//! (projects loaded, projects evaluated, build finished). Phases run in
//! order and each completed phase dispatches exactly one result; once a
//! phase fails, later phases are never invoked and nothing is dispatched
//! for them. Cancellation is reported as its own failure kind, after the
//! results of already-completed phases have been dispatched.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{BuildTreeError, BuildTreeResult};

/// Build lifecycle phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPhase {
    ProjectsLoaded,
    ProjectsEvaluated,
    BuildFinished,
}

impl BuildPhase {
    /// All phases in execution order.
    pub fn ordered() -> [BuildPhase; 3] {
        [
            BuildPhase::ProjectsLoaded,
            BuildPhase::ProjectsEvaluated,
            BuildPhase::BuildFinished,
        ]
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::ProjectsLoaded => "projects-loaded",
            BuildPhase::ProjectsEvaluated => "projects-evaluated",
            BuildPhase::BuildFinished => "build-finished",
        };
        f.write_str(name)
    }
}

/// How a phased action ended. The two kinds are reported distinctly:
/// a cancelled build is not an ordinary failure.
#[derive(Debug, Error)]
pub enum PhasedActionFailure {
    #[error("build cancelled during {phase}")]
    Cancelled { phase: BuildPhase },

    #[error("phase {phase} failed: {source}")]
    Failed {
        phase: BuildPhase,
        source: BuildTreeError,
    },
}

impl PhasedActionFailure {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PhasedActionFailure::Cancelled { .. })
    }

    pub fn phase(&self) -> BuildPhase {
        match self {
            PhasedActionFailure::Cancelled { phase } => *phase,
            PhasedActionFailure::Failed { phase, .. } => *phase,
        }
    }
}

/// Receives one result per completed phase, in phase order.
#[async_trait]
pub trait PhaseResultDispatcher: Send + Sync {
    async fn dispatch(&self, phase: BuildPhase, value: serde_json::Value) -> BuildTreeResult<()>;
}

type PhaseFn = Box<dyn FnOnce() -> BoxFuture<'static, BuildTreeResult<serde_json::Value>> + Send>;

/// A multi-phase action: at most one piece of work per phase.
#[derive(Default)]
pub struct PhasedAction {
    projects_loaded: Option<PhaseFn>,
    projects_evaluated: Option<PhaseFn>,
    build_finished: Option<PhaseFn>,
}

impl PhasedAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_projects_loaded<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = BuildTreeResult<serde_json::Value>> + Send + 'static,
    {
        self.projects_loaded = Some(Box::new(move || Box::pin(action())));
        self
    }

    pub fn on_projects_evaluated<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = BuildTreeResult<serde_json::Value>> + Send + 'static,
    {
        self.projects_evaluated = Some(Box::new(move || Box::pin(action())));
        self
    }

    pub fn on_build_finished<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = BuildTreeResult<serde_json::Value>> + Send + 'static,
    {
        self.build_finished = Some(Box::new(move || Box::pin(action())));
        self
    }

    fn take(&mut self, phase: BuildPhase) -> Option<PhaseFn> {
        match phase {
            BuildPhase::ProjectsLoaded => self.projects_loaded.take(),
            BuildPhase::ProjectsEvaluated => self.projects_evaluated.take(),
            BuildPhase::BuildFinished => self.build_finished.take(),
        }
    }
}

/// Runs a [`PhasedAction`] against a dispatcher.
pub struct PhasedActionRunner<D: PhaseResultDispatcher> {
    dispatcher: D,
}

impl<D: PhaseResultDispatcher> PhasedActionRunner<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Execute the phases present in `action`, in phase order.
    ///
    /// Each completed phase dispatches exactly one result before the next
    /// phase starts, so results of phases finished before a cancellation
    /// are already reported when the cancellation surfaces.
    pub async fn run(&self, mut action: PhasedAction) -> Result<(), PhasedActionFailure> {
        for phase in BuildPhase::ordered() {
            let Some(work) = action.take(phase) else {
                debug!(%phase, "no action for phase");
                continue;
            };

            let value = work().await.map_err(|e| classify(phase, e))?;
            self.dispatcher
                .dispatch(phase, value)
                .await
                .map_err(|e| classify(phase, e))?;
            info!(%phase, "phase result dispatched");
        }
        Ok(())
    }
}

fn classify(phase: BuildPhase, err: BuildTreeError) -> PhasedActionFailure {
    if err.is_cancellation() {
        PhasedActionFailure::Cancelled { phase }
    } else {
        PhasedActionFailure::Failed { phase, source: err }
    }
}
