//! Per-build task dependency graph and topological scheduling.
//!
//! Models the tasks of a single build as a directed acyclic graph. An edge
//! `A → B` means "B depends on A" — A must complete before B may run.
//!
//! Topological ordering is computed via Kahn's algorithm with a
//! deterministic tie-break so repeated scheduling of the same graph yields
//! the same order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{BuildTreeError, BuildTreeResult};
use crate::model::TaskPath;

/// Directed dependency graph over the tasks of one build.
///
/// Edges are stored as `dependency → dependents` adjacency lists.
/// Cycles are detected at insertion time via DFS.
#[derive(Debug, Clone, Default)]
pub struct TaskDependencyGraph {
    tasks: HashSet<TaskPath>,
    /// `dependency → {dependent, ...}` (downstream adjacency)
    downstream: HashMap<TaskPath, HashSet<TaskPath>>,
    /// `dependent → {dependency, ...}` (upstream adjacency)
    upstream: HashMap<TaskPath, HashSet<TaskPath>>,
}

impl TaskDependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Idempotent.
    pub fn add_task(&mut self, task: TaskPath) {
        self.downstream.entry(task.clone()).or_default();
        self.upstream.entry(task.clone()).or_default();
        self.tasks.insert(task);
    }

    /// `true` when `task` is registered.
    pub fn contains(&self, task: &TaskPath) -> bool {
        self.tasks.contains(task)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All registered tasks, sorted.
    pub fn tasks(&self) -> Vec<TaskPath> {
        let mut tasks: Vec<TaskPath> = self.tasks.iter().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Direct dependencies of `task` (tasks it waits for), sorted.
    pub fn dependencies_of(&self, task: &TaskPath) -> BuildTreeResult<Vec<TaskPath>> {
        if !self.contains(task) {
            return Err(self.not_found(task));
        }
        let mut deps: Vec<TaskPath> = self
            .upstream
            .get(task)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        deps.sort();
        Ok(deps)
    }

    /// Add a dependency edge: `dependent` must run after `dependency`.
    ///
    /// Both tasks must already be registered via [`add_task`]. Returns
    /// [`BuildTreeError::DependencyCycle`] if the edge would introduce a
    /// cycle (checked via DFS before the edge is committed).
    ///
    /// [`add_task`]: TaskDependencyGraph::add_task
    pub fn add_dependency(
        &mut self,
        dependent: &TaskPath,
        dependency: &TaskPath,
    ) -> BuildTreeResult<()> {
        if !self.contains(dependency) {
            return Err(self.not_found(dependency));
        }
        if !self.contains(dependent) {
            return Err(self.not_found(dependent));
        }

        // Tentatively add the edge.
        self.downstream
            .entry(dependency.clone())
            .or_default()
            .insert(dependent.clone());
        self.upstream
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());

        // DFS cycle check starting from the newly added dependent.
        if let Some(cycle) = self.find_cycle_through(dependent) {
            // Roll back.
            if let Some(set) = self.downstream.get_mut(dependency) {
                set.remove(dependent);
            }
            if let Some(set) = self.upstream.get_mut(dependent) {
                set.remove(dependency);
            }
            return Err(BuildTreeError::DependencyCycle {
                tasks: cycle.into_iter().map(|t| t.to_string()).collect(),
            });
        }

        Ok(())
    }

    /// All tasks in topological order (dependencies before dependents).
    pub fn execution_order(&self) -> BuildTreeResult<Vec<TaskPath>> {
        self.order_subset(&self.tasks)
    }

    /// Execution schedule for a set of requested tasks: the transitive
    /// dependency closure of `requested`, in topological order.
    ///
    /// Request order does not change the schedule — ordering always
    /// follows the dependency graph. Unknown tasks are rejected.
    pub fn schedule_for(&self, requested: &[TaskPath]) -> BuildTreeResult<Vec<TaskPath>> {
        let mut closure: HashSet<TaskPath> = HashSet::new();
        let mut queue: VecDeque<&TaskPath> = VecDeque::new();

        for task in requested {
            if !self.contains(task) {
                return Err(self.not_found(task));
            }
            if closure.insert(task.clone()) {
                queue.push_back(task);
            }
        }

        while let Some(task) = queue.pop_front() {
            for dep in self.upstream.get(task).into_iter().flatten() {
                if closure.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }

        self.order_subset(&closure)
    }

    /// Kahn's algorithm over `subset`, with a sorted tie-break for
    /// deterministic output.
    fn order_subset(&self, subset: &HashSet<TaskPath>) -> BuildTreeResult<Vec<TaskPath>> {
        let mut in_degree: HashMap<&TaskPath, usize> =
            subset.iter().map(|task| (task, 0)).collect();

        for (dep, dependents) in &self.downstream {
            if !subset.contains(dep) {
                continue;
            }
            for dependent in dependents {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg += 1;
                }
            }
        }

        let mut ready: Vec<&TaskPath> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&task, _)| task)
            .collect();
        ready.sort();
        let mut queue: VecDeque<&TaskPath> = ready.into_iter().collect();

        let mut sorted = Vec::new();

        while let Some(task) = queue.pop_front() {
            sorted.push(task.clone());
            if let Some(dependents) = self.downstream.get(task) {
                let mut next: Vec<&TaskPath> = Vec::new();
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(dependent);
                        }
                    }
                }
                next.sort();
                queue.extend(next);
            }
        }

        if sorted.len() != subset.len() {
            return Err(BuildTreeError::DependencyCycle {
                tasks: subset.iter().map(|t| t.to_string()).collect(),
            });
        }

        Ok(sorted)
    }

    /// DFS from `start` to detect cycles. Returns the cycle path if found.
    fn find_cycle_through(&self, start: &TaskPath) -> Option<Vec<TaskPath>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle(
        &self,
        task: &TaskPath,
        visited: &mut HashSet<TaskPath>,
        path: &mut Vec<TaskPath>,
    ) -> bool {
        if path.contains(task) {
            path.push(task.clone());
            return true;
        }
        if visited.contains(task) {
            return false;
        }
        visited.insert(task.clone());
        path.push(task.clone());

        if let Some(dependents) = self.downstream.get(task) {
            for dependent in dependents {
                if self.dfs_cycle(dependent, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }

    fn not_found(&self, task: &TaskPath) -> BuildTreeError {
        BuildTreeError::TaskNotFound {
            build: String::new(),
            task: task.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(path: &str) -> TaskPath {
        path.parse().unwrap()
    }

    fn compile_jar_publish() -> TaskDependencyGraph {
        // :publish depends on :jar, :jar depends on :compile
        let mut g = TaskDependencyGraph::new();
        g.add_task(task(":compile"));
        g.add_task(task(":jar"));
        g.add_task(task(":publish"));
        g.add_dependency(&task(":jar"), &task(":compile")).unwrap();
        g.add_dependency(&task(":publish"), &task(":jar")).unwrap();
        g
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let g = compile_jar_publish();
        let order = g.execution_order().unwrap();
        let compile = order.iter().position(|t| t == &task(":compile")).unwrap();
        let jar = order.iter().position(|t| t == &task(":jar")).unwrap();
        let publish = order.iter().position(|t| t == &task(":publish")).unwrap();
        assert!(compile < jar, ":compile must come before :jar");
        assert!(jar < publish, ":jar must come before :publish");
    }

    #[test]
    fn test_cycle_detection_rejects_mutual_dependency() {
        let mut g = TaskDependencyGraph::new();
        g.add_task(task(":a"));
        g.add_task(task(":b"));
        g.add_dependency(&task(":b"), &task(":a")).unwrap();
        let result = g.add_dependency(&task(":a"), &task(":b"));
        assert!(matches!(
            result,
            Err(BuildTreeError::DependencyCycle { .. })
        ));
        // The rejected edge must not survive in the graph.
        assert!(g.execution_order().is_ok());
    }

    #[test]
    fn test_schedule_for_pulls_in_transitive_dependencies() {
        let g = compile_jar_publish();
        let schedule = g.schedule_for(&[task(":publish")]).unwrap();
        assert_eq!(
            schedule,
            vec![task(":compile"), task(":jar"), task(":publish")]
        );
    }

    #[test]
    fn test_schedule_for_excludes_unrequested_branches() {
        let mut g = compile_jar_publish();
        g.add_task(task(":docs"));
        let schedule = g.schedule_for(&[task(":jar")]).unwrap();
        assert_eq!(schedule, vec![task(":compile"), task(":jar")]);
    }

    #[test]
    fn test_schedule_for_unknown_task_errors() {
        let g = compile_jar_publish();
        let result = g.schedule_for(&[task(":missing")]);
        assert!(matches!(result, Err(BuildTreeError::TaskNotFound { .. })));
    }

    #[test]
    fn test_schedule_is_deterministic_for_independent_tasks() {
        let mut g = TaskDependencyGraph::new();
        for t in [":c", ":a", ":b"] {
            g.add_task(task(t));
        }
        let first = g.execution_order().unwrap();
        let second = g.execution_order().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![task(":a"), task(":b"), task(":c")]);
    }

    #[test]
    fn test_diamond_graph_resolves_correctly() {
        // :check depends on :test and :lint, both depend on :compile
        let mut g = TaskDependencyGraph::new();
        for t in [":compile", ":test", ":lint", ":check"] {
            g.add_task(task(t));
        }
        g.add_dependency(&task(":test"), &task(":compile")).unwrap();
        g.add_dependency(&task(":lint"), &task(":compile")).unwrap();
        g.add_dependency(&task(":check"), &task(":test")).unwrap();
        g.add_dependency(&task(":check"), &task(":lint")).unwrap();

        let order = g.execution_order().unwrap();
        assert_eq!(order.first(), Some(&task(":compile")));
        assert_eq!(order.last(), Some(&task(":check")));
    }

    #[test]
    fn test_dependencies_of_lists_direct_upstream() {
        let g = compile_jar_publish();
        let deps = g.dependencies_of(&task(":publish")).unwrap();
        assert_eq!(deps, vec![task(":jar")]);
    }
}
