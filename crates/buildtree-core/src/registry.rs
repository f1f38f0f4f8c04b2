//! Included-build registry: the set of composite member builds and the
//! dependency-substitution table built from their published modules.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::launcher::{BuildLauncher, LauncherFactory};
use crate::model::{BuildDefinition, BuildPath, ModuleCoordinate};
use crate::nested::NestedBuild;

/// State of one composite member: its immutable definition plus the
/// factory that creates launchers for it.
pub struct IncludedBuildState {
    definition: Arc<BuildDefinition>,
    launcher_factory: Arc<dyn LauncherFactory>,
}

impl IncludedBuildState {
    pub fn new(definition: Arc<BuildDefinition>, launcher_factory: Arc<dyn LauncherFactory>) -> Self {
        Self {
            definition,
            launcher_factory,
        }
    }

    pub fn definition(&self) -> &Arc<BuildDefinition> {
        &self.definition
    }

    pub fn build_path(&self) -> &BuildPath {
        self.definition.build_path()
    }

    /// Create a fresh launcher for one invocation of this build.
    pub async fn create_launcher(&self) -> BuildTreeResult<Arc<dyn BuildLauncher>> {
        self.launcher_factory.create(&self.definition).await
    }

    /// Wrap this build for an ad-hoc nested invocation with guaranteed
    /// launcher shutdown.
    pub fn nested_build(&self) -> NestedBuild {
        NestedBuild::new(
            Arc::clone(&self.definition),
            Arc::clone(&self.launcher_factory),
        )
    }
}

/// Constructs included-build state from definitions.
#[async_trait]
pub trait IncludedBuildFactory: Send + Sync {
    async fn create_build(
        &self,
        definition: &BuildDefinition,
    ) -> BuildTreeResult<Arc<IncludedBuildState>>;
}

/// Default factory: binds every build to a shared [`LauncherFactory`].
pub struct DefaultIncludedBuildFactory {
    launcher_factory: Arc<dyn LauncherFactory>,
}

impl DefaultIncludedBuildFactory {
    pub fn new(launcher_factory: Arc<dyn LauncherFactory>) -> Self {
        Self { launcher_factory }
    }
}

#[async_trait]
impl IncludedBuildFactory for DefaultIncludedBuildFactory {
    async fn create_build(
        &self,
        definition: &BuildDefinition,
    ) -> BuildTreeResult<Arc<IncludedBuildState>> {
        Ok(Arc::new(IncludedBuildState::new(
            Arc::new(definition.clone()),
            Arc::clone(&self.launcher_factory),
        )))
    }
}

/// Tracks composite member builds, keyed by build path, and maps
/// published module coordinates to their owning build.
pub struct IncludedBuildRegistry {
    factory: Arc<dyn IncludedBuildFactory>,
    /// Registration order preserved for deterministic iteration.
    builds: Vec<Arc<IncludedBuildState>>,
    by_path: HashMap<BuildPath, usize>,
    substitutions: HashMap<ModuleCoordinate, BuildPath>,
}

impl IncludedBuildRegistry {
    pub fn new(factory: Arc<dyn IncludedBuildFactory>) -> Self {
        Self {
            factory,
            builds: Vec::new(),
            by_path: HashMap::new(),
            substitutions: HashMap::new(),
        }
    }

    /// Register an included build and wire its published modules into
    /// the substitution table.
    ///
    /// Rejects duplicate build paths and coordinates already published
    /// by another member.
    pub async fn register(
        &mut self,
        definition: BuildDefinition,
    ) -> BuildTreeResult<Arc<IncludedBuildState>> {
        let path = definition.build_path().clone();
        if self.by_path.contains_key(&path) {
            return Err(BuildTreeError::DuplicateBuild {
                build: path.to_string(),
            });
        }

        for coordinate in definition.substitutions() {
            if let Some(existing) = self.substitutions.get(coordinate) {
                return Err(BuildTreeError::AmbiguousSubstitution {
                    coordinate: coordinate.to_string(),
                    existing: existing.to_string(),
                    incoming: path.to_string(),
                });
            }
        }

        let state = self.factory.create_build(&definition).await?;
        for coordinate in definition.substitutions() {
            self.substitutions.insert(coordinate.clone(), path.clone());
        }
        self.by_path.insert(path.clone(), self.builds.len());
        self.builds.push(Arc::clone(&state));

        info!(
            build = %path,
            substitutions = definition.substitutions().len(),
            "included build registered"
        );
        Ok(state)
    }

    /// Look up a member build by path.
    pub fn find_build(&self, path: &BuildPath) -> Option<Arc<IncludedBuildState>> {
        self.by_path.get(path).map(|&i| Arc::clone(&self.builds[i]))
    }

    /// Like [`find_build`] but an unknown path is an error.
    ///
    /// [`find_build`]: IncludedBuildRegistry::find_build
    pub fn build(&self, path: &BuildPath) -> BuildTreeResult<Arc<IncludedBuildState>> {
        self.find_build(path)
            .ok_or_else(|| BuildTreeError::BuildNotFound {
                build: path.to_string(),
            })
    }

    /// Member build registered under `name` (the last path segment), if any.
    pub fn find_build_named(&self, name: &str) -> Option<Arc<IncludedBuildState>> {
        self.builds
            .iter()
            .find(|b| b.definition().name() == name)
            .map(Arc::clone)
    }

    /// Member builds in registration order.
    pub fn included_builds(&self) -> impl Iterator<Item = &Arc<IncludedBuildState>> {
        self.builds.iter()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// The build whose outputs substitute `coordinate`, if any member
    /// publishes it. Queried by dependency-substitution collaborators.
    pub fn substitution_for(&self, coordinate: &ModuleCoordinate) -> Option<&BuildPath> {
        self.substitutions.get(coordinate)
    }
}
