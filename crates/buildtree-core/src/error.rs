//! Error types for composite build coordination.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the build-tree coordination layer.
#[derive(Debug, Error)]
pub enum BuildTreeError {
    /// A build or task path string could not be parsed.
    #[error("invalid path '{raw}': {reason}")]
    InvalidPath { raw: String, reason: String },

    /// A module coordinate string could not be parsed.
    #[error("invalid module coordinate '{raw}' (expected 'group:name')")]
    InvalidCoordinate { raw: String },

    /// A dependency cycle was detected in a build's task graph.
    #[error("task dependency cycle detected involving: {tasks:?}")]
    DependencyCycle { tasks: Vec<String> },

    /// A referenced task does not exist in the owning build's graph.
    #[error("task not found in build {build}: {task}")]
    TaskNotFound { build: String, task: String },

    /// A referenced build is not part of the composite.
    #[error("build not found in composite: {build}")]
    BuildNotFound { build: String },

    /// An included build was registered twice under the same path.
    #[error("build already registered: {build}")]
    DuplicateBuild { build: String },

    /// Two included builds publish the same module coordinate.
    #[error("module {coordinate} is published by both {existing} and {incoming}")]
    AmbiguousSubstitution {
        coordinate: String,
        existing: String,
        incoming: String,
    },

    /// The launcher for a build could not be created.
    #[error("failed to create launcher for build {build}: {reason}")]
    LauncherCreation { build: String, reason: String },

    /// A launcher was used after it was stopped, or stopped twice.
    #[error("launcher for build {build} is already stopped")]
    LauncherStopped { build: String },

    /// A launcher failed to stop cleanly.
    #[error("failed to stop launcher for build {build}: {reason}")]
    LauncherStop { build: String, reason: String },

    /// The controller result slot was assigned more than once.
    #[error("result already set for build invocation {invocation}")]
    ResultAlreadySet { invocation: String },

    /// A task was awaited on a controller that never queued it.
    #[error("task {task} was never queued against build {build}")]
    TaskNotQueued { build: String, task: String },

    /// A task ran and failed in its owning build.
    #[error("task {task} failed in build {build}: {reason}")]
    TaskExecutionFailed {
        build: String,
        task: String,
        reason: String,
    },

    /// One or more included builds finished with failures.
    #[error("included builds failed: {builds:?}")]
    IncludedBuildsFailed { builds: Vec<String> },

    /// The build tree was cancelled.
    #[error("build cancelled")]
    BuildCancelled,

    /// The worker-lease service was shut down while a lease was pending.
    #[error("worker-lease service is no longer accepting requests")]
    WorkerLeasesUnavailable,

    /// A settings file could not be loaded or was malformed.
    #[error("failed to load settings {path:?}: {detail}")]
    Settings { path: PathBuf, detail: String },
}

/// Convenience result alias.
pub type BuildTreeResult<T> = std::result::Result<T, BuildTreeError>;

impl BuildTreeError {
    /// `true` for the cancellation kind, which callers report distinctly
    /// from ordinary failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BuildTreeError::BuildCancelled)
    }
}
