//! buildtree core library
//!
//! Coordinated execution of nested/included builds from a composite
//! root build:
//! - [`registry::IncludedBuildRegistry`] — composite membership and
//!   dependency substitution
//! - [`nested::NestedBuild`] — scoped nested-build invocations with a
//!   guaranteed launcher stop
//! - [`controllers::IncludedBuildControllers`] — per-build task-graph
//!   execution, concurrent and worker-lease gated
//! - [`task_graph::IncludedBuildTaskGraph`] — cross-build task
//!   references resolved to executable handles
//! - [`phased::PhasedActionRunner`] — multi-phase tooling actions with
//!   per-phase result dispatch

pub mod classpath;
pub mod controllers;
pub mod error;
pub mod graph;
pub mod launcher;
pub mod lease;
pub mod model;
pub mod nested;
pub mod phased;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod task_graph;
pub mod telemetry;

pub use classpath::ScriptClassPathInitializer;
pub use controllers::{
    CancellationSignal, IncludedBuildController, IncludedBuildControllers, TaskStatus,
};
pub use error::{BuildTreeError, BuildTreeResult};
pub use graph::TaskDependencyGraph;
pub use launcher::{
    BuildLauncher, InProcessLauncher, InProcessLauncherFactory, LauncherBlueprint, LauncherFactory,
    TaskAction, TaskExecutionReport, TaskExecutionResult, TaskOutcome,
};
pub use lease::{WorkerLease, WorkerLeaseService};
pub use model::{
    BuildDefinition, BuildInvocationId, BuildPath, ModuleCoordinate, StartParameters, TaskPath,
    TaskReference,
};
pub use nested::{BuildController, BuildStateListener, NestedBuild};
pub use phased::{
    BuildPhase, PhaseResultDispatcher, PhasedAction, PhasedActionFailure, PhasedActionRunner,
};
pub use registry::{
    DefaultIncludedBuildFactory, IncludedBuildFactory, IncludedBuildRegistry, IncludedBuildState,
};
pub use resolver::{ResolvedTask, TaskReferenceResolver};
pub use settings::{CompositeSettings, IncludedBuildSettings, RootSettings, TaskSettings};
pub use task_graph::{IncludedBuildTaskGraph, TaskHandle};
pub use telemetry::init_tracing;

/// buildtree version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
