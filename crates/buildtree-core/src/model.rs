//! Build-tree data model: build and task paths, cross-build task
//! references, module coordinates and immutable build definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BuildTreeError, BuildTreeResult};

/// Identifies a build within the composite tree.
///
/// The root build is `:`; an included build registered as `app` is `:app`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildPath(String);

impl BuildPath {
    /// The composite root build.
    pub fn root() -> Self {
        BuildPath(":".to_string())
    }

    /// `true` when this path identifies the composite root.
    pub fn is_root(&self) -> bool {
        self.0 == ":"
    }

    /// Append a child segment, e.g. `:` + `app` → `:app`.
    pub fn child(&self, name: &str) -> Self {
        if self.is_root() {
            BuildPath(format!(":{name}"))
        } else {
            BuildPath(format!("{}:{name}", self.0))
        }
    }

    /// The last path segment, or `:` for the root build.
    pub fn name(&self) -> &str {
        match self.0.rsplit(':').next() {
            Some("") | None => ":",
            Some(name) => name,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BuildPath {
    type Err = BuildTreeError;

    fn from_str(s: &str) -> BuildTreeResult<Self> {
        validate_path(s)?;
        Ok(BuildPath(s.to_string()))
    }
}

/// Identifies a task within one build, e.g. `:compile` or `:sub:jar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPath(String);

impl TaskPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The task name without its project prefix (`:sub:jar` → `jar`).
    pub fn task_name(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskPath {
    type Err = BuildTreeError;

    fn from_str(s: &str) -> BuildTreeResult<Self> {
        validate_path(s)?;
        if s == ":" {
            return Err(BuildTreeError::InvalidPath {
                raw: s.to_string(),
                reason: "task path needs at least one segment".to_string(),
            });
        }
        Ok(TaskPath(s.to_string()))
    }
}

/// Shared validation for `:`-separated paths: leading colon, no empty
/// segments (the bare root `:` is allowed).
fn validate_path(s: &str) -> BuildTreeResult<()> {
    if s.is_empty() {
        return Err(BuildTreeError::InvalidPath {
            raw: s.to_string(),
            reason: "empty path".to_string(),
        });
    }
    if !s.starts_with(':') {
        return Err(BuildTreeError::InvalidPath {
            raw: s.to_string(),
            reason: "path must start with ':'".to_string(),
        });
    }
    if s != ":" && s[1..].split(':').any(|seg| seg.is_empty()) {
        return Err(BuildTreeError::InvalidPath {
            raw: s.to_string(),
            reason: "path contains an empty segment".to_string(),
        });
    }
    Ok(())
}

/// A cross-build pointer to a task: which build owns it, and the task's
/// path within that build. Resolved lazily against the included-build
/// task graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskReference {
    pub build: BuildPath,
    pub task: TaskPath,
}

impl TaskReference {
    pub fn new(build: BuildPath, task: TaskPath) -> Self {
        Self { build, task }
    }
}

impl fmt::Display for TaskReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.build.is_root() {
            write!(f, "{}", self.task)
        } else {
            write!(f, "{}{}", self.build, self.task)
        }
    }
}

/// Identifies a substitutable module published by an included build,
/// e.g. `org.sample:number-utils`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleCoordinate {
    pub group: String,
    pub name: String,
}

impl ModuleCoordinate {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

impl FromStr for ModuleCoordinate {
    type Err = BuildTreeError;

    fn from_str(s: &str) -> BuildTreeResult<Self> {
        match s.split_once(':') {
            Some((group, name)) if !group.is_empty() && !name.is_empty() && !name.contains(':') => {
                Ok(ModuleCoordinate::new(group, name))
            }
            _ => Err(BuildTreeError::InvalidCoordinate { raw: s.to_string() }),
        }
    }
}

/// Parameters a build is launched with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParameters {
    /// Tasks requested on the command line, in request order.
    #[serde(default)]
    pub task_names: Vec<TaskPath>,

    /// Project properties (`-P` style key/value pairs).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Keep executing unaffected tasks after a failure.
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// Immutable description of a build to launch.
///
/// Created once per included build and owned by the registry; there are
/// deliberately no mutators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDefinition {
    name: String,
    build_path: BuildPath,
    root_dir: PathBuf,
    start_parameters: StartParameters,
    substitutions: Vec<ModuleCoordinate>,
}

impl BuildDefinition {
    /// Definition for an included build, addressed as `:{name}`.
    pub fn included(
        name: impl Into<String>,
        root_dir: impl Into<PathBuf>,
        start_parameters: StartParameters,
        substitutions: Vec<ModuleCoordinate>,
    ) -> Self {
        let name = name.into();
        let build_path = BuildPath::root().child(&name);
        Self {
            name,
            build_path,
            root_dir: root_dir.into(),
            start_parameters,
            substitutions,
        }
    }

    /// Definition for the composite root build itself.
    pub fn root(root_dir: impl Into<PathBuf>, start_parameters: StartParameters) -> Self {
        Self {
            name: "root".to_string(),
            build_path: BuildPath::root(),
            root_dir: root_dir.into(),
            start_parameters,
            substitutions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build_path(&self) -> &BuildPath {
        &self.build_path
    }

    pub fn root_dir(&self) -> &std::path::Path {
        &self.root_dir
    }

    pub fn start_parameters(&self) -> &StartParameters {
        &self.start_parameters
    }

    /// Module coordinates this build publishes into the composite, used
    /// to substitute external dependencies with local project outputs.
    pub fn substitutions(&self) -> &[ModuleCoordinate] {
        &self.substitutions
    }
}

/// Identifies one launcher run of a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildInvocationId(Uuid);

impl BuildInvocationId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        BuildInvocationId(Uuid::new_v4())
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for BuildInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
