//! Composite settings file (`buildtree.json`): declares the root build,
//! the included builds, the modules they publish and their task graphs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::graph::TaskDependencyGraph;
use crate::launcher::{
    InProcessLauncherFactory, LauncherBlueprint, TaskAction, TaskOutcome,
};
use crate::model::{BuildDefinition, BuildPath, ModuleCoordinate, StartParameters, TaskPath};

/// One task declaration: name, upstream dependencies, declared outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSettings {
    /// Task path within the build, e.g. `:jar`.
    pub name: String,

    /// Task paths this task runs after.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Files the task produces, contributed to consumers' classpaths.
    #[serde(default)]
    pub produces: Vec<PathBuf>,
}

/// One included build declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncludedBuildSettings {
    pub name: String,
    pub dir: PathBuf,

    /// Module coordinates (`group:name`) this build substitutes.
    #[serde(default)]
    pub provides: Vec<String>,

    #[serde(default)]
    pub tasks: Vec<TaskSettings>,
}

/// The root build's own declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootSettings {
    pub name: String,

    #[serde(default = "default_root_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub tasks: Vec<TaskSettings>,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Full composite description, loaded from `buildtree.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeSettings {
    pub root: RootSettings,

    #[serde(default)]
    pub includes: Vec<IncludedBuildSettings>,
}

impl CompositeSettings {
    /// Load and parse a settings file.
    pub fn load(path: &Path) -> BuildTreeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| BuildTreeError::Settings {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let settings: CompositeSettings =
            serde_json::from_str(&raw).map_err(|e| BuildTreeError::Settings {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        debug!(
            root = %settings.root.name,
            includes = settings.includes.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    /// Definitions for every included build, in declaration order.
    pub fn included_definitions(&self) -> BuildTreeResult<Vec<BuildDefinition>> {
        self.includes
            .iter()
            .map(|inc| {
                let substitutions = inc
                    .provides
                    .iter()
                    .map(|raw| ModuleCoordinate::from_str(raw))
                    .collect::<BuildTreeResult<Vec<_>>>()?;
                Ok(BuildDefinition::included(
                    inc.name.clone(),
                    inc.dir.clone(),
                    StartParameters::default(),
                    substitutions,
                ))
            })
            .collect()
    }

    /// Definition for the root build itself.
    pub fn root_definition(&self, requested: Vec<TaskPath>) -> BuildDefinition {
        BuildDefinition::root(
            self.root.dir.clone(),
            StartParameters {
                task_names: requested,
                ..StartParameters::default()
            },
        )
    }

    /// An in-process launcher factory wired with one blueprint per build
    /// (root included), each task succeeding with its declared outputs.
    pub fn launcher_factory(&self) -> BuildTreeResult<Arc<InProcessLauncherFactory>> {
        let factory = Arc::new(InProcessLauncherFactory::new());

        factory.register(BuildPath::root(), blueprint_for(&self.root.tasks)?);
        for inc in &self.includes {
            let path = BuildPath::root().child(&inc.name);
            factory.register(path, blueprint_for(&inc.tasks)?);
        }
        Ok(factory)
    }
}

fn blueprint_for(tasks: &[TaskSettings]) -> BuildTreeResult<LauncherBlueprint> {
    let mut graph = TaskDependencyGraph::new();
    let mut actions: HashMap<TaskPath, TaskAction> = HashMap::new();

    for task in tasks {
        graph.add_task(task.name.parse()?);
    }
    for task in tasks {
        let path: TaskPath = task.name.parse()?;
        for dep in &task.depends_on {
            graph.add_dependency(&path, &dep.parse()?)?;
        }
        if !task.produces.is_empty() {
            let artifacts = task.produces.clone();
            actions.insert(
                path,
                Arc::new(move |_: &TaskPath| TaskOutcome::Succeeded {
                    artifacts: artifacts.clone(),
                }),
            );
        }
    }

    Ok(LauncherBlueprint { graph, actions })
}
